//! In-process lease store.
//!
//! Every operation runs under one mutex, which makes each conditional insert
//! atomic within the process. Useful for tests and for coordinating tasks that
//! share a single process.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::LeaseStore;
use crate::{
    lease::{expiry_after, HolderToken, LeaseRow},
    Result,
};

type Leases = HashMap<String, Vec<LeaseRow>>;

/// Lease store held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    leases: Arc<Mutex<Leases>>,
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn purge(leases: &mut Leases, resource: &str, now: DateTime<Utc>) -> u64 {
    let Some(rows) = leases.get_mut(resource) else {
        return 0;
    };
    let before = rows.len();
    rows.retain(|row| !row.is_expired_at(now));
    let purged = before - rows.len();
    if rows.is_empty() {
        leases.remove(resource);
    }
    u64::try_from(purged).unwrap_or(u64::MAX)
}

fn live_rows<'a>(leases: &'a Leases, resource: &str) -> &'a [LeaseRow] {
    leases.get(resource).map_or(&[], Vec::as_slice)
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn purge_dead(&self, resource: &str) -> Result<u64> {
        let mut leases = self.leases.lock().await;
        Ok(purge(&mut leases, resource, Utc::now()))
    }

    async fn count_live(&self, resource: &str) -> Result<u64> {
        let mut leases = self.leases.lock().await;
        purge(&mut leases, resource, Utc::now());
        Ok(u64::try_from(live_rows(&leases, resource).len()).unwrap_or(u64::MAX))
    }

    async fn insert_exclusive(&self, resource: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expiry_after(now, ttl)?;
        let mut leases = self.leases.lock().await;
        purge(&mut leases, resource, now);

        if live_rows(&leases, resource).iter().any(LeaseRow::is_exclusive) {
            return Ok(false);
        }

        leases.entry(resource.to_string()).or_default().push(LeaseRow {
            resource_name: resource.to_string(),
            holder_token: HolderToken::exclusive(),
            owner: holder.to_string(),
            acquired_at: now,
            expires_at,
        });
        Ok(true)
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
        let expires_at = expiry_after(now, ttl)?;
        let mut leases = self.leases.lock().await;
        purge(&mut leases, resource, now);

        let rows = live_rows(&leases, resource);
        let live = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        if live >= u64::from(limit) || rows.iter().any(|row| &row.holder_token == token) {
            return Ok(false);
        }

        leases.entry(resource.to_string()).or_default().push(LeaseRow {
            resource_name: resource.to_string(),
            holder_token: token.clone(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at,
        });
        Ok(true)
    }

    async fn delete_matching(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
    ) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        purge(&mut leases, resource, Utc::now());

        let Some(rows) = leases.get_mut(resource) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| !row.matches(token, owner));
        let deleted = rows.len() != before;
        if rows.is_empty() {
            leases.remove(resource);
        }
        Ok(deleted)
    }

    async fn update_expiry(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: Option<&str>,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = expiry_after(now, ttl)?;
        let mut leases = self.leases.lock().await;

        let row = leases.get_mut(resource).and_then(|rows| {
            rows.iter_mut()
                .find(|row| row.matches(token, owner) && !row.is_expired_at(now))
        });
        match row {
            Some(row) => {
                row.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_live(&self, resource: &str) -> Result<Vec<LeaseRow>> {
        let mut leases = self.leases.lock().await;
        purge(&mut leases, resource, Utc::now());

        let mut rows = live_rows(&leases, resource).to_vec();
        rows.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.holder_token.as_str().cmp(b.holder_token.as_str()))
        });
        Ok(rows)
    }
}
