//! # Leasehold Core
//!
//! Lease-based exclusive and shared (counting) locks coordinated through a
//! durable store that several processes share.
//!
//! - An **exclusive** lock admits one holder per resource name.
//! - A **shared** lock admits up to `limit` holders per resource name.
//! - Every grant is a lease with a TTL. Dead leases are purged lazily, the next
//!   time the resource is counted, acquired, released or listed.
//!
//! All mutual exclusion is delegated to one atomic conditional insert in the
//! store. Nothing is cached in process.
//!
//! ## Layers
//!
//! - [`store`]: the [`LeaseStore`] trait with `SQLite` and in-memory backends
//! - [`coordinator`]: single-attempt acquire, release, extend, count, wait
//! - [`retry`]: bounded polling for blocking acquires
//! - [`registry`]: per-context holder tokens, so release needs only a name
//! - [`service`]: the caller-facing [`LockService`] / [`LockContext`]
//! - [`guard`]: scoped acquisition and background renewal
//!
//! ## Example
//!
//! ```ignore
//! let store = SqliteLeaseStore::open(Path::new("leases.db"), &SqliteStoreOptions::default()).await?;
//! let service = LockService::new(store);
//! let ctx = service.context("worker-1");
//!
//! let lease = ctx.acquire_shared("exports", Duration::from_secs(60), 4, AcquireMode::Blocking).await?;
//! // ... bounded-concurrency work ...
//! ctx.release("exports").await?;
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod coordinator;
mod error;
pub mod guard;
pub mod lease;
pub mod registry;
pub mod retry;
pub mod service;
pub mod store;

pub use cancel::{cancel_pair, CancelSource, CancelToken};
pub use config::{load_config, load_config_from, Config};
pub use coordinator::LockCoordinator;
pub use error::{Error, Result};
pub use guard::{renewal_interval, spawn_renewal};
pub use lease::{HolderToken, LeaseRow, LockKind, EXCLUSIVE_TOKEN};
pub use registry::{ContextId, HolderKeyRegistry};
pub use retry::{retry_acquire, AcquireMode, RetryPolicy};
pub use service::{Lease, LockContext, LockService};
pub use store::{
    sqlite::SqliteStoreOptions, LeaseStore, MemoryLeaseStore, SqliteLeaseStore,
};
