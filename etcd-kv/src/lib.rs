//! A small etcd v3 client.
//!
//! `etcd-kv` talks to any store implementing the etcd v3 KV, Lease and Watch
//! gRPC services, over plain TCP or mutual TLS.
//!
//! # Features
//!
//! - Put and get with multi-version reads (`GetOptions::with_revision`)
//! - Prefix, from-key and explicit ranges with sort and limit for pagination
//! - Leases: grant, revoke, time-to-live; keys bound to a lease expire with it
//! - Watches, and `Client::wait_for_delete` built on them
//!
//! # Example
//!
//! ```no_run
//! use etcd_kv::{Client, Config, DeleteOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(Config::new(["localhost:2379"])).await?;
//!
//!     client.delete("key", Some(DeleteOptions::new().with_prefix())).await?;
//!     let resp = client.put("key", "444", None).await?;
//!     println!("Revision: {}", resp.revision);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod options;
mod types;
mod watch;

pub use client::Client;
pub use config::{Config, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, TlsConfig};
pub use error::Error;
pub use options::{
    DeleteOptions, GetOptions, PutOptions, SortOrder, SortTarget, WatchOptions, prefix_end,
};
pub use types::{
    DeleteResponse, Event, EventType, GetResponse, KeyValue, Lease, LeaseTimeToLive, PutResponse,
};
pub use watch::WatchStream;
