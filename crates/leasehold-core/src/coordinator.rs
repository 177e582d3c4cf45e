//! Lock coordinator
//!
//! Single-attempt lock operations over a [`LeaseStore`]. The coordinator holds
//! no in-process lock and caches nothing: every call goes to the store, and the
//! store's atomic conditional insert is the only source of mutual exclusion.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument};

use crate::{
    cancel::CancelToken,
    lease::{validate_limit, validate_resource_name, validate_ttl, HolderToken, LeaseRow},
    store::LeaseStore,
    Error, Result,
};

/// Default interval between polls in [`LockCoordinator::wait_until_free`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Acquire, release, extend and inspect leases on one store.
#[derive(Debug)]
pub struct LockCoordinator<S> {
    store: Arc<S>,
    poll_interval: Duration,
}

impl<S> Clone for LockCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: LeaseStore> LockCoordinator<S> {
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval used by [`Self::wait_until_free`].
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Try once to take the exclusive lease on `resource`.
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire_exclusive(
        &self,
        resource: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;

        let acquired = self.store.insert_exclusive(resource, holder, ttl).await?;
        debug!(resource, holder, acquired, "exclusive acquire attempt");
        Ok(acquired)
    }

    /// Try once to take one of `limit` shared slots on `resource`.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn acquire_shared(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: &str,
        limit: u32,
        ttl: Duration,
    ) -> Result<bool> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;
        validate_limit(limit)?;
        if token.is_exclusive() {
            return Err(Error::InvalidArgument(
                "the exclusive sentinel cannot be used as a shared holder token".to_string(),
            ));
        }

        let acquired = self
            .store
            .insert_shared(resource, token, owner, limit, ttl)
            .await?;
        debug!(resource, token = %token, limit, acquired, "shared acquire attempt");
        Ok(acquired)
    }

    /// Delete the lease identified by `(resource, token)`.
    #[instrument(skip(self, token), level = "debug", fields(token = %token))]
    pub async fn release(&self, resource: &str, token: &HolderToken) -> Result<bool> {
        validate_resource_name(resource)?;

        let released = self.store.delete_matching(resource, token, None).await?;
        debug!(resource, released, "release");
        Ok(released)
    }

    /// Delete `(resource, token)` only while `owner` still owns it.
    #[instrument(skip(self, token), level = "debug", fields(token = %token))]
    pub async fn release_owned(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: &str,
    ) -> Result<bool> {
        validate_resource_name(resource)?;

        let released = self
            .store
            .delete_matching(resource, token, Some(owner))
            .await?;
        debug!(resource, owner, released, "owned release");
        Ok(released)
    }

    /// Push the expiry of a live lease to `now + ttl`.
    #[instrument(skip(self, token), level = "debug", fields(token = %token))]
    pub async fn extend(&self, resource: &str, token: &HolderToken, ttl: Duration) -> Result<bool> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;

        let extended = self.store.update_expiry(resource, token, None, ttl).await?;
        debug!(resource, extended, "extend");
        Ok(extended)
    }

    /// Extend `(resource, token)` only while `owner` still owns it.
    #[instrument(skip(self, token), level = "debug", fields(token = %token))]
    pub async fn extend_owned(
        &self,
        resource: &str,
        token: &HolderToken,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;

        let extended = self
            .store
            .update_expiry(resource, token, Some(owner), ttl)
            .await?;
        debug!(resource, owner, extended, "owned extend");
        Ok(extended)
    }

    /// Number of live leases on `resource`.
    pub async fn live_count(&self, resource: &str) -> Result<u64> {
        validate_resource_name(resource)?;
        self.store.count_live(resource).await
    }

    /// Live leases on `resource`, oldest first.
    pub async fn holders(&self, resource: &str) -> Result<Vec<LeaseRow>> {
        validate_resource_name(resource)?;
        self.store.list_live(resource).await
    }

    /// Poll until `resource` has no live leases.
    ///
    /// There is no time limit; stop it with `cancel`.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn wait_until_free(&self, resource: &str, cancel: &CancelToken) -> Result<()> {
        validate_resource_name(resource)?;

        loop {
            let live = self.store.count_live(resource).await?;
            if live == 0 {
                return Ok(());
            }

            debug!(resource, live, "resource busy, polling again in {:?}", self.poll_interval);
            if !cancel.sleep(self.poll_interval).await {
                return Err(Error::cancelled(resource));
            }
        }
    }
}
