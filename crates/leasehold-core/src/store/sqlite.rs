//! `SQLite` lease store.
//!
//! One table, `resource_leases`, keyed by `(resource_name, holder_token)`. The
//! key is the uniqueness domain for exclusive leases: every exclusive lease uses
//! the sentinel token, so two live exclusive rows for one resource cannot exist.
//!
//! Each conditional insert is a single statement. `SQLite` takes the write lock
//! at the start of a writing statement, so the embedded count / conflict check
//! and the insert cannot interleave with another writer.
//!
//! Timestamps are stored as unix epoch milliseconds.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::debug;

use super::LeaseStore;
use crate::{
    lease::{expiry_after, HolderToken, LeaseRow},
    Error, Result,
};

const CREATE_LEASES_TABLE: &str = "CREATE TABLE IF NOT EXISTS resource_leases (
    resource_name TEXT NOT NULL,
    holder_token TEXT NOT NULL,
    owner TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (resource_name, holder_token)
)";

const CREATE_EXPIRY_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_resource_leases_expiry
    ON resource_leases(resource_name, expires_at)";

const INSERT_EXCLUSIVE: &str = "INSERT INTO resource_leases
        (resource_name, holder_token, owner, acquired_at, expires_at)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(resource_name, holder_token) DO UPDATE SET
        owner = excluded.owner,
        acquired_at = excluded.acquired_at,
        expires_at = excluded.expires_at
    WHERE resource_leases.expires_at < excluded.acquired_at";

const INSERT_SHARED: &str = "INSERT INTO resource_leases
        (resource_name, holder_token, owner, acquired_at, expires_at)
    SELECT ?, ?, ?, ?, ?
    WHERE (
        SELECT COUNT(*) FROM resource_leases
        WHERE resource_name = ? AND expires_at >= ?
    ) < ?
    ON CONFLICT(resource_name, holder_token) DO NOTHING";

/// Connection settings for [`SqliteLeaseStore::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteStoreOptions {
    /// How long a statement waits for another process's write lock.
    pub busy_timeout: Duration,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 5,
        }
    }
}

/// Lease store backed by an `SQLite` database file shared between processes.
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    db: SqlitePool,
}

impl SqliteLeaseStore {
    /// Wrap an existing pool. Call [`Self::init`] before use.
    #[must_use]
    pub const fn from_pool(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path, options: &SqliteStoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let db = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        let store = Self::from_pool(db);
        store.init().await?;
        debug!(path = %path.display(), "opened lease store");
        Ok(store)
    }

    /// A private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::from_pool(db);
        store.init().await?;
        Ok(store)
    }

    /// Get the database pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create the leases table and index.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_LEASES_TABLE).execute(&self.db).await?;
        sqlx::query(CREATE_EXPIRY_INDEX).execute(&self.db).await?;
        Ok(())
    }

    async fn purge_at(&self, resource: &str, now_ms: i64) -> Result<u64> {
        let purged =
            sqlx::query("DELETE FROM resource_leases WHERE resource_name = ? AND expires_at < ?")
                .bind(resource)
                .bind(now_ms)
                .execute(&self.db)
                .await?
                .rows_affected();

        if purged > 0 {
            debug!(resource, purged, "purged expired leases");
        }
        Ok(purged)
    }
}

fn expires_ms(now: DateTime<Utc>, ttl: Duration) -> Result<i64> {
    expiry_after(now, ttl).map(|at| at.timestamp_millis())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::ParseError(format!("Stored timestamp {ms} is out of range")))
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn purge_dead(&self, resource: &str) -> Result<u64> {
        self.purge_at(resource, Utc::now().timestamp_millis()).await
    }

    async fn count_live(&self, resource: &str) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        self.purge_at(resource, now_ms).await?;

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM resource_leases WHERE resource_name = ? AND expires_at >= ?",
        )
        .bind(resource)
        .bind(now_ms)
        .fetch_one(&self.db)
        .await?;

        u64::try_from(count).map_err(|e| Error::ParseError(format!("Invalid lease count: {e}")))
    }

    async fn insert_exclusive(&self, resource: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_at = expires_ms(now, ttl)?;
        self.purge_at(resource, now_ms).await?;

        let inserted = sqlx::query(INSERT_EXCLUSIVE)
            .bind(resource)
            .bind(crate::lease::EXCLUSIVE_TOKEN)
            .bind(holder)
            .bind(now_ms)
            .bind(expires_at)
            .execute(&self.db)
            .await?
            .rows_affected();

        Ok(inserted > 0)
    }

    async fn insert_shared(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: &str,
        limit: u32,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_at = expires_ms(now, ttl)?;
        self.purge_at(resource, now_ms).await?;

        let inserted = sqlx::query(INSERT_SHARED)
            .bind(resource)
            .bind(token.as_str())
            .bind(owner)
            .bind(now_ms)
            .bind(expires_at)
            .bind(resource)
            .bind(now_ms)
            .bind(i64::from(limit))
            .execute(&self.db)
            .await?
            .rows_affected();

        Ok(inserted > 0)
    }

    async fn delete_matching(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
    ) -> Result<bool> {
        self.purge_at(resource, Utc::now().timestamp_millis()).await?;

        let deleted = sqlx::query(
            "DELETE FROM resource_leases
             WHERE resource_name = ?1 AND holder_token = ?2 AND (?3 IS NULL OR owner = ?3)",
        )
        .bind(resource)
        .bind(token.as_str())
        .bind(owner)
        .execute(&self.db)
        .await?
        .rows_affected();

        Ok(deleted > 0)
    }

    async fn update_expiry(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expires_ms(now, ttl)?;

        let updated = sqlx::query(
            "UPDATE resource_leases SET expires_at = ?1
             WHERE resource_name = ?2 AND holder_token = ?3 AND expires_at >= ?4
               AND (?5 IS NULL OR owner = ?5)",
        )
        .bind(expires_at)
        .bind(resource)
        .bind(token.as_str())
        .bind(now.timestamp_millis())
        .bind(owner)
        .execute(&self.db)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn list_live(&self, resource: &str) -> Result<Vec<LeaseRow>> {
        let now_ms = Utc::now().timestamp_millis();
        self.purge_at(resource, now_ms).await?;

        let rows: Vec<(String, String, String, i64, i64)> = sqlx::query_as(
            "SELECT resource_name, holder_token, owner, acquired_at, expires_at
             FROM resource_leases
             WHERE resource_name = ? AND expires_at >= ?
             ORDER BY acquired_at ASC, holder_token ASC",
        )
        .bind(resource)
        .bind(now_ms)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(resource_name, token, owner, acquired, expires)| {
                Ok(LeaseRow {
                    resource_name,
                    holder_token: HolderToken::parse(&token)?,
                    owner,
                    acquired_at: from_millis(acquired)?,
                    expires_at: from_millis(expires)?,
                })
            })
            .collect()
    }
}
