//! A local multi-version key-value store speaking the etcd v3 KV, Lease and
//! Watch gRPC subset.
//!
//! History lives in an append-only sqlite table: every mutation appends one
//! row per key and carries the store-wide revision, so reads at an older
//! revision and watch replays are plain queries over that table.

pub mod db;
pub mod grpc;
pub mod lease;
pub mod models;
pub mod storage;
