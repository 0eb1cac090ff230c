use crate::models::{KeyRange, KeyRecord};
use crate::storage::{RangeQuery, Storage, StorageError};
use async_trait::async_trait;
use etcd_api_types::etcdserverpb::{
    kv_server::{Kv, KvServer},
    lease_server::{Lease, LeaseServer},
    watch_create_request::FilterType,
    watch_request::RequestUnion,
    watch_server::{Watch, WatchServer},
    DeleteRangeRequest, DeleteRangeResponse, LeaseGrantRequest, LeaseGrantResponse,
    LeaseRevokeRequest, LeaseRevokeResponse, LeaseTimeToLiveRequest, LeaseTimeToLiveResponse,
    PutRequest, PutResponse, RangeRequest, RangeResponse, ResponseHeader, WatchCreateRequest,
    WatchRequest, WatchResponse,
};
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);
const ONE_WATCHER_PER_STREAM: &str = "only one watcher per stream is supported";

fn header(revision: i64) -> Option<ResponseHeader> {
    Some(ResponseHeader {
        revision,
        ..Default::default()
    })
}

impl From<StorageError> for Status {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EmptyKey => Status::invalid_argument("etcdserver: key is not provided"),
            StorageError::FutureRevision { .. } => {
                Status::out_of_range("etcdserver: mvcc: required revision is a future revision")
            }
            StorageError::LeaseNotFound(_) => {
                Status::not_found("etcdserver: requested lease not found")
            }
            StorageError::LeaseExists(_) => {
                Status::failed_precondition("etcdserver: lease already exists")
            }
            StorageError::InvalidTtl(_) => {
                Status::invalid_argument("etcdserver: invalid lease TTL")
            }
            StorageError::Sql(e) => Status::internal(format!("Database error: {}", e)),
        }
    }
}

#[derive(Clone)]
pub struct KvService {
    storage: Arc<Storage>,
}

#[async_trait]
impl Kv for KvService {
    async fn range(
        &self,
        request: Request<RangeRequest>,
    ) -> Result<Response<RangeResponse>, Status> {
        let req = request.into_inner();
        let mut query = RangeQuery::new(KeyRange::new(req.key.clone(), req.range_end.clone()));
        query.revision = req.revision;
        query.limit = req.limit;
        query.sort_order = req.sort_order();
        query.sort_target = req.sort_target();
        query.keys_only = req.keys_only;
        query.count_only = req.count_only;

        let result = self.storage.range(&query).await?;
        tracing::debug!(
            count = result.count,
            revision = result.revision,
            "range served"
        );

        Ok(Response::new(RangeResponse {
            header: header(result.revision),
            kvs: result.kvs.iter().map(KeyRecord::to_key_value).collect(),
            more: result.more,
            count: result.count,
        }))
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let req = request.into_inner();
        let want_prev = req.prev_kv;
        let (revision, prev) = self.storage.put(req.key, req.value, req.lease).await?;

        Ok(Response::new(PutResponse {
            header: header(revision),
            prev_kv: prev
                .filter(|_| want_prev)
                .map(|record| record.to_key_value()),
        }))
    }

    async fn delete_range(
        &self,
        request: Request<DeleteRangeRequest>,
    ) -> Result<Response<DeleteRangeResponse>, Status> {
        let req = request.into_inner();
        let range = KeyRange::new(req.key, req.range_end);
        let (revision, deleted) = self.storage.delete_range(&range).await?;

        let prev_kvs = if req.prev_kv {
            deleted.iter().map(KeyRecord::to_key_value).collect()
        } else {
            Vec::new()
        };

        Ok(Response::new(DeleteRangeResponse {
            header: header(revision),
            deleted: deleted.len() as i64,
            prev_kvs,
        }))
    }
}

#[derive(Clone)]
pub struct LeaseService {
    storage: Arc<Storage>,
}

#[async_trait]
impl Lease for LeaseService {
    async fn lease_grant(
        &self,
        request: Request<LeaseGrantRequest>,
    ) -> Result<Response<LeaseGrantResponse>, Status> {
        let req = request.into_inner();
        let lease = self.storage.grant_lease(req.id, req.ttl).await?;
        let revision = self.storage.revision().await?;
        tracing::info!(lease = lease.id, ttl = lease.ttl, "lease granted");

        Ok(Response::new(LeaseGrantResponse {
            header: header(revision),
            id: lease.id,
            ttl: lease.ttl,
            error: String::new(),
        }))
    }

    async fn lease_revoke(
        &self,
        request: Request<LeaseRevokeRequest>,
    ) -> Result<Response<LeaseRevokeResponse>, Status> {
        let id = request.into_inner().id;
        let revision = self.storage.revoke_lease(id).await?;
        tracing::info!(lease = id, "lease revoked");

        Ok(Response::new(LeaseRevokeResponse {
            header: header(revision),
        }))
    }

    async fn lease_time_to_live(
        &self,
        request: Request<LeaseTimeToLiveRequest>,
    ) -> Result<Response<LeaseTimeToLiveResponse>, Status> {
        let req = request.into_inner();
        let revision = self.storage.revision().await?;

        let response = match self.storage.lease_status(req.id).await? {
            Some(status) => LeaseTimeToLiveResponse {
                header: header(revision),
                id: req.id,
                ttl: status.remaining,
                granted_ttl: status.lease.ttl,
                keys: if req.keys { status.keys } else { Vec::new() },
            },
            None => LeaseTimeToLiveResponse {
                header: header(revision),
                id: req.id,
                ttl: -1,
                granted_ttl: 0,
                keys: Vec::new(),
            },
        };

        Ok(Response::new(response))
    }
}

#[derive(Clone)]
pub struct WatchService {
    storage: Arc<Storage>,
}

type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchResponse, Status>> + Send>>;

enum Step {
    Inbound(Option<Result<WatchRequest, Status>>),
    Tick,
}

/// Id for the answer to a surplus create request; never the active watcher's.
fn rejected_watch_id(requested: i64, active: i64) -> i64 {
    if requested > 0 && requested != active {
        requested
    } else {
        active + 1
    }
}

/// Waits for the first create request; `None` if the client went away first.
async fn first_create(inbound: &mut Streaming<WatchRequest>) -> Option<WatchCreateRequest> {
    while let Some(Ok(req)) = inbound.next().await {
        if let Some(RequestUnion::CreateRequest(create)) = req.request_union {
            return Some(create);
        }
    }
    None
}

#[async_trait]
impl Watch for WatchService {
    type WatchStream = WatchStream;

    /// Serves one watcher per stream. History is replayed from the requested
    /// start revision and new rows are picked up by polling the records table.
    async fn watch(
        &self,
        request: Request<Streaming<WatchRequest>>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let mut inbound = request.into_inner();
        let storage = self.storage.clone();

        let output = async_stream::try_stream! {
            if let Some(create) = first_create(&mut inbound).await {
                let watch_id = create.watch_id;
                let range = KeyRange::new(create.key.clone(), create.range_end.clone());
                let skip_put = create.filters.contains(&(FilterType::Noput as i32));
                let skip_delete = create.filters.contains(&(FilterType::Nodelete as i32));

                let current = storage.revision().await.map_err(Status::from)?;
                let mut next = if create.start_revision > 0 {
                    create.start_revision
                } else {
                    current + 1
                };
                tracing::debug!(watch_id, start = next, "watch created");

                yield WatchResponse {
                    header: header(current),
                    watch_id,
                    created: true,
                    ..Default::default()
                };

                let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);
                loop {
                    let step = tokio::select! {
                        msg = inbound.next() => Step::Inbound(msg),
                        _ = ticker.tick() => Step::Tick,
                    };

                    match step {
                        Step::Inbound(Some(Ok(req))) => match req.request_union {
                            Some(RequestUnion::CancelRequest(cancel))
                                if cancel.watch_id == watch_id =>
                            {
                                let revision = storage.revision().await.map_err(Status::from)?;
                                yield WatchResponse {
                                    header: header(revision),
                                    watch_id,
                                    canceled: true,
                                    ..Default::default()
                                };
                                break;
                            }
                            Some(RequestUnion::CreateRequest(extra)) => {
                                let revision = storage.revision().await.map_err(Status::from)?;
                                let rejected_id = rejected_watch_id(extra.watch_id, watch_id);
                                yield WatchResponse {
                                    header: header(revision),
                                    watch_id: rejected_id,
                                    created: true,
                                    canceled: true,
                                    cancel_reason: ONE_WATCHER_PER_STREAM.to_string(),
                                    ..Default::default()
                                };
                            }
                            _ => {}
                        },
                        Step::Inbound(_) => break,
                        Step::Tick => {
                            let records = storage
                                .events_since(next, &range)
                                .await
                                .map_err(Status::from)?;
                            let last = match records.last() {
                                Some(last) => last.revision,
                                None => continue,
                            };
                            next = last + 1;

                            let events: Vec<_> = records
                                .iter()
                                .filter(|r| {
                                    if r.tombstone { !skip_delete } else { !skip_put }
                                })
                                .map(KeyRecord::to_event)
                                .collect();
                            if events.is_empty() {
                                continue;
                            }

                            yield WatchResponse {
                                header: header(last),
                                watch_id,
                                events,
                                ..Default::default()
                            };
                        }
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(output)))
    }
}

/// Builds a router serving the KV, Lease and Watch services over `storage`.
pub fn create_router(storage: Arc<Storage>) -> Router {
    Server::builder()
        .add_service(KvServer::new(KvService {
            storage: storage.clone(),
        }))
        .add_service(LeaseServer::new(LeaseService {
            storage: storage.clone(),
        }))
        .add_service(WatchServer::new(WatchService { storage }))
}
