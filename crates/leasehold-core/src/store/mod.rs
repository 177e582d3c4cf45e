//! Lease store adapter
//!
//! Translates coordination intents into operations on the backing store. The
//! store owns atomicity: an implementation must evaluate each conditional
//! insert and its predicate as one indivisible operation, so racing callers can
//! never both observe "room available".
//!
//! Every operation purges dead rows for the resource first (lazy expiry),
//! except `update_expiry`, which only matches live rows.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    lease::{HolderToken, LeaseRow},
    Result,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLeaseStore;
pub use sqlite::SqliteLeaseStore;

/// Storage backend for leases.
///
/// `Ok(false)` means the store evaluated the request and said no. `Err` means
/// the store could not be consulted; implementations must never fold a store
/// failure into `Ok(false)`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Delete rows for `resource` whose expiry has passed.
    async fn purge_dead(&self, resource: &str) -> Result<u64>;

    /// Purge, then count live rows for `resource`.
    async fn count_live(&self, resource: &str) -> Result<u64>;

    /// Purge, then insert the exclusive sentinel row unless a live one exists.
    /// `holder` is recorded as the row owner.
    async fn insert_exclusive(&self, resource: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Purge, then insert `token` only if fewer than `limit` live rows exist.
    async fn insert_shared(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: &str,
        limit: u32,
        ttl: Duration,
    ) -> Result<bool>;

    /// Purge, then delete the `(resource, token)` row. With `owner` set, only
    /// a row still owned by `owner` matches.
    async fn delete_matching(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
    ) -> Result<bool>;

    /// Move the expiry of the live `(resource, token)` row to `now + ttl`.
    /// `owner` narrows the match as in [`Self::delete_matching`].
    async fn update_expiry(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Purge, then list live rows for `resource`, oldest first.
    async fn list_live(&self, resource: &str) -> Result<Vec<LeaseRow>>;
}
