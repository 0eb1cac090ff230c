//! Demonstration runner for an etcd v3 compatible store.
//!
//! Runs, one after the other:
//!
//! - put, overwrite, and read back both at the latest and at the first revision
//! - bind a key to a one second lease and observe the store deleting it
//! - write twenty keys under a prefix and page through them in sorted order
//!
//! All calls of a run share one deadline. A failing scenario is logged and the
//! run continues with the next one.

pub mod config;
mod deadline;
mod error;
mod pager;
mod runner;

pub use deadline::Deadline;
pub use error::Error;
pub use pager::Pager;
pub use runner::{
    DemoRunner, LEASE_TTL_SECS, LeaseReport, PAGE_SIZE, PAGINATION_KEYS, PaginationReport,
    RevisionReport, minimum_budget,
};
