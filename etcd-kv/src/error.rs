//! Error types for etcd-kv operations.

use std::path::PathBuf;

use thiserror::Error;
use tonic::Code;

#[derive(Debug, Error)]
pub enum Error {
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),

    #[error("failed to read TLS material {path:?}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("timed out")]
    Timeout,

    #[error("watch canceled: {0}")]
    WatchCanceled(String),

    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// `true` for local timeouts and for requests the server gave up on.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Status(status) => status.code() == Code::DeadlineExceeded,
            _ => false,
        }
    }
}
