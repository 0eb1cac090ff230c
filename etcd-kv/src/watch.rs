//! Watch streams.

use etcd_api_types::etcdserverpb::watch_client::WatchClient;
use etcd_api_types::etcdserverpb::watch_request::RequestUnion;
use etcd_api_types::etcdserverpb::{
    WatchCancelRequest, WatchCreateRequest, WatchRequest, WatchResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tonic::transport::Channel;

use crate::Error;
use crate::types::Event;

/// One watcher on one gRPC stream.
pub struct WatchStream {
    watch_id: i64,
    requests: mpsc::Sender<WatchRequest>,
    responses: Streaming<WatchResponse>,
}

impl WatchStream {
    pub(crate) async fn open(
        mut client: WatchClient<Channel>,
        create: WatchCreateRequest,
    ) -> Result<Self, Error> {
        let (requests, rx) = mpsc::channel(4);
        requests
            .send(WatchRequest {
                request_union: Some(RequestUnion::CreateRequest(create)),
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let mut responses = client.watch(ReceiverStream::new(rx)).await?.into_inner();
        let created = responses.message().await?.ok_or(Error::ConnectionClosed)?;
        if created.canceled {
            return Err(Error::WatchCanceled(created.cancel_reason));
        }
        tracing::debug!(watch_id = created.watch_id, "watch created");

        Ok(Self {
            watch_id: created.watch_id,
            requests,
            responses,
        })
    }

    pub fn watch_id(&self) -> i64 {
        self.watch_id
    }

    /// Next non-empty batch of events, or `None` once the store closes the
    /// stream.
    pub async fn next_events(&mut self) -> Result<Option<Vec<Event>>, Error> {
        while let Some(resp) = self.responses.message().await? {
            if resp.canceled {
                return Err(Error::WatchCanceled(resp.cancel_reason));
            }
            if resp.events.is_empty() {
                continue;
            }
            return Ok(Some(resp.events.into_iter().map(Event::from).collect()));
        }
        Ok(None)
    }

    pub async fn cancel(self) -> Result<(), Error> {
        self.requests
            .send(WatchRequest {
                request_union: Some(RequestUnion::CancelRequest(WatchCancelRequest {
                    watch_id: self.watch_id,
                })),
            })
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}
