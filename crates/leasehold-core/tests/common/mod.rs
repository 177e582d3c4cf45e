//! Shared helpers for leasehold-core integration tests

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use leasehold_core::{
    LockService, MemoryLeaseStore, Result, RetryPolicy, SqliteLeaseStore, SqliteStoreOptions,
};
use tempfile::TempDir;

/// Retry policy small enough for tests to exhaust quickly.
pub const QUICK: RetryPolicy = RetryPolicy {
    interval: Duration::from_millis(10),
    max_attempts: 20,
};

pub const POLL: Duration = Duration::from_millis(20);

/// A file-backed store in a fresh temp directory, pooled like a real deployment.
pub async fn sqlite_store() -> Result<(TempDir, SqliteLeaseStore)> {
    let dir = tempfile::tempdir()?;
    let store = open_sqlite(&dir).await?;
    Ok((dir, store))
}

/// Open another independent store on the database in `dir`, as a second
/// process would.
pub async fn open_sqlite(dir: &TempDir) -> Result<SqliteLeaseStore> {
    let options = SqliteStoreOptions {
        busy_timeout: Duration::from_secs(10),
        max_connections: 4,
    };
    SqliteLeaseStore::open(&dir.path().join("leases.db"), &options).await
}

pub fn quick_service<S: leasehold_core::LeaseStore>(store: Arc<S>) -> LockService<S> {
    LockService::with_store(store)
        .with_retry_policies(QUICK, QUICK)
        .with_poll_interval(POLL)
}

pub fn memory_service() -> LockService<MemoryLeaseStore> {
    quick_service(Arc::new(MemoryLeaseStore::new()))
}
