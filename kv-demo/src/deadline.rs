use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::Error;

/// A single point in time shared by a whole batch of store calls.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Runs one store call, failing with [`Error::RequestTimeout`] if the
    /// deadline passes first.
    pub async fn run<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, etcd_kv::Error>>,
    {
        match tokio::time::timeout_at(self.0, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::RequestTimeout),
        }
    }
}
