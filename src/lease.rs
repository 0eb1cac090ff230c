//! Background revocation of expired leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::models::now_millis;
use crate::storage::Storage;

/// Spawns a task that revokes expired leases every `every`, deleting the keys
/// attached to them.
pub fn spawn_reaper(storage: Arc<Storage>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match storage.expire_leases(now_millis()).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(leases = ?expired, "expired leases revoked");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("lease reaper failed: {}", e),
            }
        }
    })
}
