//! Error types for kv-demo scenarios.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] etcd_kv::Error),

    #[error("request deadline exceeded")]
    RequestTimeout,

    #[error("unexpected result: {0}")]
    Unexpected(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<etcd_kv::Error> for Error {
    fn from(err: etcd_kv::Error) -> Self {
        if err.is_timeout() {
            Error::RequestTimeout
        } else {
            Error::StoreUnavailable(err)
        }
    }
}
