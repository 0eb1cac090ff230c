//! Store client over the KV, Lease and Watch services.

use std::time::Duration;

use etcd_api_types::etcdserverpb::kv_client::KvClient;
use etcd_api_types::etcdserverpb::lease_client::LeaseClient;
use etcd_api_types::etcdserverpb::watch_client::WatchClient;
use etcd_api_types::etcdserverpb::{
    LeaseGrantRequest, LeaseRevokeRequest, LeaseTimeToLiveRequest, ResponseHeader,
};
use tonic::transport::{Channel, Endpoint};

use crate::config::{Config, endpoint_uri};
use crate::error::Error;
use crate::options::{DeleteOptions, GetOptions, PutOptions, WatchOptions};
use crate::types::{DeleteResponse, EventType, GetResponse, Lease, LeaseTimeToLive, PutResponse};
use crate::watch::WatchStream;

/// A connection to an etcd v3 compatible store.
///
/// Cloning is cheap; clones share the underlying channel. Every call blocks
/// until the store answers; deadlines are the caller's business, apart from
/// [`Client::wait_for_delete`] which takes its own bound.
///
/// # Example
///
/// ```no_run
/// use etcd_kv::{Client, Config, GetOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect(Config::new(["localhost:2379"])).await?;
///
///     let first = client.put("slop", "bob", None).await?.revision;
///     client.put("slop", "555", None).await?;
///
///     let old = client
///         .get("slop", Some(GetOptions::new().with_revision(first)))
///         .await?;
///     assert_eq!(old.kvs[0].value, b"bob");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    kv: KvClient<Channel>,
    lease: LeaseClient<Channel>,
    watch: WatchClient<Channel>,
    request_timeout: Duration,
}

impl Client {
    /// Connects to the first reachable endpoint of `config`.
    ///
    /// TLS material is read before dialing; a missing or unreadable file
    /// fails the call with [`Error::TlsMaterial`].
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let tls = config.tls.as_ref().map(|tls| tls.load()).transpose()?;

        let mut last_err = None;
        for endpoint in &config.endpoints {
            let uri = endpoint_uri(endpoint, tls.is_some());
            let mut builder =
                Endpoint::from_shared(uri.clone())?.connect_timeout(config.dial_timeout);
            if let Some(tls) = &tls {
                builder = builder.tls_config(tls.clone())?;
            }

            match builder.connect().await {
                Ok(channel) => {
                    tracing::info!(endpoint = %uri, "connected");
                    let client =
                        Self::from_channel(channel).with_request_timeout(config.request_timeout);
                    return Ok(client);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %uri, "connect failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.map(Error::from).unwrap_or(Error::NoEndpoints))
    }

    /// Builds a client on an existing channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            kv: KvClient::new(channel.clone()),
            lease: LeaseClient::new(channel.clone()),
            watch: WatchClient::new(channel),
            request_timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Budget configured for one batch of requests.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Writes `key`, returning the revision the store assigned to it.
    pub async fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        options: Option<PutOptions>,
    ) -> Result<PutResponse, Error> {
        let request = options
            .unwrap_or_default()
            .into_request(key.into(), value.into());
        let mut kv = self.kv.clone();
        Ok(kv.put(request).await?.into_inner().into())
    }

    pub async fn get(
        &self,
        key: impl Into<Vec<u8>>,
        options: Option<GetOptions>,
    ) -> Result<GetResponse, Error> {
        let request = options.unwrap_or_default().into_request(key.into());
        let mut kv = self.kv.clone();
        Ok(kv.range(request).await?.into_inner().into())
    }

    pub async fn delete(
        &self,
        key: impl Into<Vec<u8>>,
        options: Option<DeleteOptions>,
    ) -> Result<DeleteResponse, Error> {
        let request = options.unwrap_or_default().into_request(key.into());
        let mut kv = self.kv.clone();
        Ok(kv.delete_range(request).await?.into_inner().into())
    }

    /// Grants a lease of `ttl` seconds with a store-assigned id.
    pub async fn grant_lease(&self, ttl: i64) -> Result<Lease, Error> {
        let mut lease = self.lease.clone();
        let resp = lease
            .lease_grant(LeaseGrantRequest { ttl, id: 0 })
            .await?
            .into_inner();

        if !resp.error.is_empty() {
            return Err(Error::Status(tonic::Status::unknown(resp.error)));
        }
        Ok(Lease {
            id: resp.id,
            ttl: resp.ttl,
        })
    }

    /// Revokes a lease, deleting its keys. Returns the resulting revision.
    pub async fn revoke_lease(&self, id: i64) -> Result<i64, Error> {
        let mut lease = self.lease.clone();
        let resp = lease
            .lease_revoke(LeaseRevokeRequest { id })
            .await?
            .into_inner();
        Ok(header_revision(resp.header))
    }

    pub async fn lease_time_to_live(&self, id: i64, keys: bool) -> Result<LeaseTimeToLive, Error> {
        let mut lease = self.lease.clone();
        let resp = lease
            .lease_time_to_live(LeaseTimeToLiveRequest { id, keys })
            .await?
            .into_inner();
        Ok(resp.into())
    }

    /// Opens a watch on `key` and waits until the store confirms it.
    pub async fn watch(
        &self,
        key: impl Into<Vec<u8>>,
        options: Option<WatchOptions>,
    ) -> Result<WatchStream, Error> {
        let create = options.unwrap_or_default().into_request(key.into());
        WatchStream::open(self.watch.clone(), create).await
    }

    /// Waits until `key` is deleted after `after_revision` and returns the
    /// deletion revision.
    ///
    /// The watch replays history from `after_revision + 1`, so a deletion that
    /// happened before the watch was set up is still observed.
    pub async fn wait_for_delete(
        &self,
        key: impl Into<Vec<u8>>,
        after_revision: i64,
        timeout: Duration,
    ) -> Result<i64, Error> {
        let key = key.into();
        let options = WatchOptions::new()
            .with_start_revision(after_revision + 1)
            .with_filter_put();

        let wait = async {
            let mut stream = self.watch(key, Some(options)).await?;
            while let Some(events) = stream.next_events().await? {
                if let Some(deleted) = events.iter().find(|e| e.kind == EventType::Delete) {
                    let revision = deleted.kv.mod_revision;
                    tracing::debug!(watch_id = stream.watch_id(), revision, "deletion observed");
                    if let Err(e) = stream.cancel().await {
                        tracing::debug!("watch cancel failed: {}", e);
                    }
                    return Ok(revision);
                }
            }
            Err(Error::ConnectionClosed)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

fn header_revision(header: Option<ResponseHeader>) -> i64 {
    header.map(|h| h.revision).unwrap_or_default()
}
