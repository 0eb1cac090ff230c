//! The demo scenarios.
//!
//! Each scenario is a flat sequence of store calls made under the runner's
//! shared [`Deadline`]. A failing call aborts its scenario only; `run_all`
//! logs the error and moves on to the next one.

use std::time::Duration;

use etcd_kv::{Client, DeleteOptions, GetOptions, KeyValue, Lease, PutOptions};

use crate::deadline::Deadline;
use crate::error::Error;
use crate::pager::Pager;

pub const LEASE_TTL_SECS: i64 = 1;
pub const PAGINATION_KEYS: usize = 20;
pub const PAGE_SIZE: i64 = 3;

/// What the put-then-read-at-revision scenario observed.
#[derive(Debug, Clone)]
pub struct RevisionReport {
    /// Revision returned by the first put.
    pub first_revision: i64,
    /// Read right after the first put.
    pub initial: KeyValue,
    /// Read after the overwrite.
    pub updated: KeyValue,
    /// Read at `first_revision` after the overwrite.
    pub historical: KeyValue,
}

#[derive(Debug, Clone)]
pub struct LeaseReport {
    pub lease: Lease,
    pub absent_before: bool,
    pub present_after_put: bool,
    /// Revision at which the store deleted the key.
    pub deleted_at: i64,
    pub absent_after_expiry: bool,
}

#[derive(Debug, Clone)]
pub struct PaginationReport {
    pub pages: Vec<Vec<KeyValue>>,
}

impl PaginationReport {
    pub fn keys(&self) -> Vec<String> {
        self.pages
            .iter()
            .flatten()
            .map(|kv| kv.key_str().into_owned())
            .collect()
    }
}

pub struct DemoRunner {
    client: Client,
    deadline: Deadline,
}

impl DemoRunner {
    /// Uses the client's request timeout as the budget for the whole run.
    pub fn new(client: Client) -> Self {
        let deadline = Deadline::after(client.request_timeout());
        Self::with_deadline(client, deadline)
    }

    pub fn with_deadline(client: Client, deadline: Deadline) -> Self {
        Self { client, deadline }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Runs every scenario in order and returns how many of them failed.
    pub async fn run_all(&self) -> usize {
        let mut failed = 0;

        println!("*** RevisionReadDemo()");
        failed += log_failure(
            "revision read",
            self.revision_read("slop", "bob", "555", None).await,
        );

        println!("*** RevisionReadAfterCleanupDemo()");
        failed += log_failure(
            "revision read after cleanup",
            self.revision_read("key", "444", "555", Some("key")).await,
        );

        println!("*** LeaseExpiryDemo()");
        failed += log_failure(
            "lease expiry",
            self.lease_expiry("key", "key", LEASE_TTL_SECS).await,
        );

        println!("*** PaginationDemo()");
        failed += log_failure(
            "pagination",
            self.paginate("key", PAGINATION_KEYS, PAGE_SIZE).await,
        );

        failed
    }

    /// Writes `first`, overwrites it with `second`, then reads the key both
    /// at the latest revision and at the revision of the first write.
    pub async fn revision_read(
        &self,
        key: &str,
        first: &str,
        second: &str,
        clear_prefix: Option<&str>,
    ) -> Result<RevisionReport, Error> {
        if let Some(prefix) = clear_prefix {
            self.delete_prefix(prefix).await?;
        }

        let put = self.deadline.run(self.client.put(key, first, None)).await?;
        let first_revision = put.revision;
        println!("Revision: {}", first_revision);

        let initial = self.read(key, None).await?;
        self.deadline.run(self.client.put(key, second, None)).await?;
        let updated = self.read(key, None).await?;
        let historical = self
            .read(key, Some(GetOptions::new().with_revision(first_revision)))
            .await?;

        Ok(RevisionReport {
            first_revision,
            initial,
            updated,
            historical,
        })
    }

    /// Binds `key` to a fresh lease of `ttl` seconds and waits for the store
    /// to delete it once the lease runs out.
    pub async fn lease_expiry(
        &self,
        prefix: &str,
        key: &str,
        ttl: i64,
    ) -> Result<LeaseReport, Error> {
        self.delete_prefix(prefix).await?;

        let absent_before = self.lookup(key).await?.is_none();
        if absent_before {
            println!("No '{}'", key);
        }

        let lease = self.deadline.run(self.client.grant_lease(ttl)).await?;
        tracing::debug!(lease = lease.id, ttl = lease.ttl, "lease granted");

        let put = self
            .deadline
            .run(self.client.put(key, "value", Some(PutOptions::new().with_lease(lease.id))))
            .await?;

        let present_after_put = self.lookup(key).await?.is_some();
        if present_after_put {
            println!("Found '{}'", key);
        }

        let deleted_at = self
            .deadline
            .run(
                self.client
                    .wait_for_delete(key, put.revision, self.deadline.remaining()),
            )
            .await?;

        let absent_after_expiry = self.lookup(key).await?.is_none();
        if absent_after_expiry {
            println!("No more '{}'", key);
        }

        Ok(LeaseReport {
            lease,
            absent_before,
            present_after_put,
            deleted_at,
            absent_after_expiry,
        })
    }

    /// Writes `count` keys `<prefix>_NN` and reads them back in pages of
    /// `page_size`, printing the first two pages.
    pub async fn paginate(
        &self,
        prefix: &str,
        count: usize,
        page_size: i64,
    ) -> Result<PaginationReport, Error> {
        self.delete_prefix(prefix).await?;

        for i in 0..count {
            let key = format!("{}_{:02}", prefix, i);
            self.deadline
                .run(self.client.put(key, i.to_string(), None))
                .await?;
        }

        let mut pager = Pager::new(&self.client, prefix, page_size);
        let mut pages = Vec::new();
        while let Some(page) = self.deadline.run(pager.next_page()).await? {
            pages.push(page);
        }

        for (title, page) in ["--- First page ---", "--- Second page ---"]
            .iter()
            .zip(&pages)
        {
            println!("{}", title);
            for kv in page {
                println!("{} {}", kv.key_str(), kv.value_str());
            }
        }

        Ok(PaginationReport { pages })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<i64, Error> {
        let resp = self
            .deadline
            .run(self.client.delete(prefix, Some(DeleteOptions::new().with_prefix())))
            .await?;
        tracing::debug!(prefix, deleted = resp.deleted, "prefix cleared");
        Ok(resp.deleted)
    }

    async fn lookup(&self, key: &str) -> Result<Option<KeyValue>, Error> {
        let resp = self.deadline.run(self.client.get(key, None)).await?;
        Ok(resp.kvs.into_iter().next())
    }

    /// Reads a key that must exist and prints it with the store revision.
    async fn read(&self, key: &str, options: Option<GetOptions>) -> Result<KeyValue, Error> {
        let resp = self.deadline.run(self.client.get(key, options)).await?;
        let kv = resp
            .kvs
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unexpected(format!("key {:?} not found", key)))?;
        println!("Value: {} Revision: {}", kv.value_str(), resp.revision);
        Ok(kv)
    }
}

fn log_failure<T>(scenario: &str, result: Result<T, Error>) -> usize {
    match result {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!(scenario, "scenario aborted: {}", e);
            1
        }
    }
}

/// Budget of a run that has to outlive one lease expiry.
pub fn minimum_budget() -> Duration {
    Duration::from_secs(LEASE_TTL_SECS as u64 + 2)
}
