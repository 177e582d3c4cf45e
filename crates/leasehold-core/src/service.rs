//! Caller-facing lock operations.
//!
//! [`LockService`] bundles a coordinator, the holder key registry, the retry
//! policies and a cancellation token. [`LockService::context`] binds it to one
//! calling context, giving a [`LockContext`] whose `release`/`extend` need only
//! the resource name: the token issued at acquire time is found in the
//! registry.
//!
//! Boolean outcomes from the coordinator become errors here:
//! - not admitted: [`Error::NotAdmitted`]
//! - nothing to release or extend: [`Error::LeaseNotFound`]

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    cancel::CancelToken,
    config::Config,
    coordinator::LockCoordinator,
    lease::{
        validate_limit, validate_resource_name, validate_ttl, HolderToken, LeaseRow, LockKind,
    },
    registry::{ContextId, HolderKeyRegistry},
    retry::{retry_acquire, AcquireMode, RetryPolicy},
    store::LeaseStore,
    Error, Result,
};

/// A granted lease, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub resource: String,
    pub token: HolderToken,
    #[serde(flatten)]
    pub kind: LockKind,
    pub owner: ContextId,
    #[serde(rename = "ttl_secs", serialize_with = "serialize_secs")]
    pub ttl: Duration,
}

fn serialize_secs<S: serde::Serializer>(
    ttl: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(ttl.as_secs_f64())
}

impl Lease {
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        matches!(self.kind, LockKind::Exclusive)
    }
}

/// Shared entry point for lock operations on one store.
#[derive(Debug)]
pub struct LockService<S> {
    coordinator: LockCoordinator<S>,
    registry: HolderKeyRegistry,
    shared_retry: RetryPolicy,
    exclusive_retry: RetryPolicy,
    cancel: CancelToken,
}

impl<S> Clone for LockService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            registry: self.registry.clone(),
            shared_retry: self.shared_retry,
            exclusive_retry: self.exclusive_retry,
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: LeaseStore> LockService<S> {
    /// Service with the default retry policies and poll interval.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Service over a store that is already shared.
    #[must_use]
    pub fn with_store(store: Arc<S>) -> Self {
        Self {
            coordinator: LockCoordinator::new(store),
            registry: HolderKeyRegistry::new(),
            shared_retry: RetryPolicy::SHARED,
            exclusive_retry: RetryPolicy::EXCLUSIVE,
            cancel: CancelToken::never(),
        }
    }

    /// Service configured from a loaded [`Config`].
    #[must_use]
    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store)
            .with_retry_policies(config.shared_policy(), config.exclusive_policy())
            .with_poll_interval(config.poll_interval())
    }

    #[must_use]
    pub const fn with_retry_policies(
        mut self,
        shared: RetryPolicy,
        exclusive: RetryPolicy,
    ) -> Self {
        self.shared_retry = shared;
        self.exclusive_retry = exclusive;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.coordinator = self.coordinator.with_poll_interval(poll_interval);
        self
    }

    /// Blocking operations stop with [`Error::Cancelled`] once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn coordinator(&self) -> &LockCoordinator<S> {
        &self.coordinator
    }

    #[must_use]
    pub const fn registry(&self) -> &HolderKeyRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Bind the service to a calling context.
    #[must_use]
    pub fn context(&self, id: impl Into<ContextId>) -> LockContext<S> {
        LockContext {
            service: self.clone(),
            id: id.into(),
        }
    }
}

/// Lock operations on behalf of one calling context.
#[derive(Debug)]
pub struct LockContext<S> {
    service: LockService<S>,
    id: ContextId,
}

impl<S> Clone for LockContext<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            id: self.id.clone(),
        }
    }
}

impl<S: LeaseStore> LockContext<S> {
    #[must_use]
    pub const fn id(&self) -> &ContextId {
        &self.id
    }

    #[must_use]
    pub const fn service(&self) -> &LockService<S> {
        &self.service
    }

    /// Take one of `limit` shared slots on `resource`.
    ///
    /// In blocking mode this polls per the shared retry policy. Exhaustion and
    /// a refused non-blocking attempt are both [`Error::NotAdmitted`].
    pub async fn acquire_shared(
        &self,
        resource: &str,
        ttl: Duration,
        limit: u32,
        mode: AcquireMode,
    ) -> Result<Lease> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;
        validate_limit(limit)?;

        let service = &self.service;
        let token = HolderToken::generate(&self.id);
        let policy = service.shared_retry.for_mode(mode);

        let admitted = retry_acquire(policy, &service.cancel, resource, || {
            service
                .coordinator
                .acquire_shared(resource, &token, self.id.as_str(), limit, ttl)
        })
        .await?;

        if !admitted {
            return Err(Error::not_admitted(resource));
        }

        // Registered only once admitted, so a pending acquire never shadows a
        // lease this context already holds.
        service
            .registry
            .record(&self.id, resource, token.clone())
            .await;
        info!(resource, context = %self.id, limit, "acquired shared lock");
        Ok(Lease {
            resource: resource.to_string(),
            token,
            kind: LockKind::Shared { limit },
            owner: self.id.clone(),
            ttl,
        })
    }

    /// Take the exclusive lease on `resource`.
    pub async fn acquire_exclusive(
        &self,
        resource: &str,
        ttl: Duration,
        mode: AcquireMode,
    ) -> Result<Lease> {
        validate_resource_name(resource)?;
        validate_ttl(ttl)?;

        let service = &self.service;
        let policy = service.exclusive_retry.for_mode(mode);

        let admitted = retry_acquire(policy, &service.cancel, resource, || {
            service
                .coordinator
                .acquire_exclusive(resource, self.id.as_str(), ttl)
        })
        .await?;

        if !admitted {
            return Err(Error::not_admitted(resource));
        }

        info!(resource, context = %self.id, "acquired exclusive lock");
        Ok(Lease {
            resource: resource.to_string(),
            token: HolderToken::exclusive(),
            kind: LockKind::Exclusive,
            owner: self.id.clone(),
            ttl,
        })
    }

    /// Release the most recent lease this context took on `resource`.
    ///
    /// Without a registered shared token the exclusive lease is released.
    pub async fn release(&self, resource: &str) -> Result<()> {
        let token = self.resolve_token(resource).await;
        self.release_with_token(resource, &token).await
    }

    /// Extend the most recent lease this context took on `resource`.
    ///
    /// The token stays registered, so a later `release` still finds it.
    pub async fn extend(&self, resource: &str, ttl: Duration) -> Result<()> {
        let token = self.resolve_token(resource).await;
        self.extend_with_token(resource, &token, ttl).await
    }

    /// Release a specific lease.
    ///
    /// Only deletes the row while `lease.owner` still owns it: an exclusive
    /// lease that expired and was taken over by another context is left alone
    /// and reported as [`Error::LeaseNotFound`].
    pub async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let released = self
            .service
            .coordinator
            .release_owned(&lease.resource, &lease.token, lease.owner.as_str())
            .await?;
        self.settle_release(&lease.resource, &lease.token, released)
            .await
    }

    /// Extend a specific lease, as long as `lease.owner` still owns it.
    pub async fn extend_lease(&self, lease: &Lease, ttl: Duration) -> Result<()> {
        let extended = self
            .service
            .coordinator
            .extend_owned(&lease.resource, &lease.token, lease.owner.as_str(), ttl)
            .await?;
        if extended {
            Ok(())
        } else {
            Err(Error::lease_not_found(&lease.resource))
        }
    }

    /// Block until `resource` has no live leases, or the service is cancelled.
    pub async fn wait_until_free(&self, resource: &str) -> Result<()> {
        self.service
            .coordinator
            .wait_until_free(resource, &self.service.cancel)
            .await
    }

    pub async fn live_count(&self, resource: &str) -> Result<u64> {
        self.service.coordinator.live_count(resource).await
    }

    pub async fn holders(&self, resource: &str) -> Result<Vec<LeaseRow>> {
        self.service.coordinator.holders(resource).await
    }

    async fn resolve_token(&self, resource: &str) -> HolderToken {
        self.service
            .registry
            .peek(&self.id, resource)
            .await
            .unwrap_or_else(HolderToken::exclusive)
    }

    /// Release the lease `(resource, token)`, e.g. a token handed over from
    /// another process.
    pub async fn release_with_token(&self, resource: &str, token: &HolderToken) -> Result<()> {
        let released = self.service.coordinator.release(resource, token).await?;
        self.settle_release(resource, token, released).await
    }

    async fn settle_release(
        &self,
        resource: &str,
        token: &HolderToken,
        released: bool,
    ) -> Result<()> {
        // Released or already gone: the token is spent either way.
        if !token.is_exclusive() {
            self.service.registry.discard(&self.id, resource, token).await;
        }

        if released {
            info!(resource, context = %self.id, "released lock");
            Ok(())
        } else {
            warn!(resource, context = %self.id, token = %token, "no live lease to release");
            Err(Error::lease_not_found(resource))
        }
    }

    /// Extend the lease `(resource, token)`.
    pub async fn extend_with_token(
        &self,
        resource: &str,
        token: &HolderToken,
        ttl: Duration,
    ) -> Result<()> {
        if self.service.coordinator.extend(resource, token, ttl).await? {
            Ok(())
        } else {
            Err(Error::lease_not_found(resource))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cancel::cancel_pair, store::MemoryLeaseStore};

    const MINUTE: Duration = Duration::from_secs(60);

    fn service() -> LockService<MemoryLeaseStore> {
        let quick = RetryPolicy {
            interval: Duration::from_millis(5),
            max_attempts: 3,
        };
        LockService::new(MemoryLeaseStore::new())
            .with_retry_policies(quick, quick)
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_release_by_name_uses_registered_token() -> Result<()> {
        let service = service();
        let ctx = service.context("worker-1");

        let lease = ctx
            .acquire_shared("pool", MINUTE, 3, AcquireMode::NonBlocking)
            .await?;
        assert!(!lease.is_exclusive());
        assert_eq!(service.registry().outstanding(ctx.id()).await, 1);

        ctx.release("pool").await?;
        assert_eq!(ctx.live_count("pool").await?, 0);
        assert_eq!(service.registry().outstanding(ctx.id()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_extend_keeps_token_for_release() -> Result<()> {
        let service = service();
        let ctx = service.context("worker-1");

        ctx.acquire_shared("pool", MINUTE, 3, AcquireMode::NonBlocking)
            .await?;
        ctx.extend("pool", MINUTE * 2).await?;
        ctx.release("pool").await?;
        assert_eq!(ctx.live_count("pool").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_admitted_registers_no_token() -> Result<()> {
        let service = service();
        let a = service.context("a");
        let b = service.context("b");

        a.acquire_shared("pool", MINUTE, 1, AcquireMode::NonBlocking)
            .await?;
        let refused = b
            .acquire_shared("pool", MINUTE, 1, AcquireMode::NonBlocking)
            .await;

        assert!(matches!(refused, Err(Error::NotAdmitted { .. })));
        assert_eq!(service.registry().outstanding(b.id()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking_exhaustion_is_not_admitted() -> Result<()> {
        let service = service();
        let a = service.context("a");
        let b = service.context("b");

        a.acquire_exclusive("reports", MINUTE, AcquireMode::Blocking)
            .await?;
        let refused = b
            .acquire_exclusive("reports", MINUTE, AcquireMode::Blocking)
            .await;
        assert!(matches!(refused, Err(Error::NotAdmitted { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_exclusive_release_falls_back_to_sentinel() -> Result<()> {
        let service = service();
        let a = service.context("a");

        let lease = a
            .acquire_exclusive("reports", MINUTE, AcquireMode::NonBlocking)
            .await?;
        assert!(lease.is_exclusive());
        assert_eq!(lease.token, HolderToken::exclusive());

        a.release("reports").await?;
        let again = a.release("reports").await;
        assert!(matches!(again, Err(Error::LeaseNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_shared_acquires_release_in_reverse_order() -> Result<()> {
        let service = service();
        let ctx = service.context("worker-1");

        let outer = ctx
            .acquire_shared("pool", MINUTE, 5, AcquireMode::NonBlocking)
            .await?;
        let inner = ctx
            .acquire_shared("pool", MINUTE, 5, AcquireMode::NonBlocking)
            .await?;
        assert_ne!(outer.token, inner.token);

        ctx.release("pool").await?;
        let remaining = ctx.holders("pool").await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].holder_token, outer.token);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_lease_directly() -> Result<()> {
        let service = service();
        let ctx = service.context("worker-1");

        let lease = ctx
            .acquire_shared("pool", MINUTE, 2, AcquireMode::NonBlocking)
            .await?;
        ctx.extend_lease(&lease, MINUTE).await?;
        ctx.release_lease(&lease).await?;

        assert_eq!(service.registry().outstanding(ctx.id()).await, 0);
        assert!(matches!(
            ctx.extend_lease(&lease, MINUTE).await,
            Err(Error::LeaseNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_release_during_pending_acquire_targets_held_lease() -> Result<()> {
        let patient = RetryPolicy {
            interval: Duration::from_millis(5),
            max_attempts: 400,
        };
        let service =
            LockService::new(MemoryLeaseStore::new()).with_retry_policies(patient, patient);
        let ctx = service.context("worker-1");
        let other = service.context("worker-2");

        let held = ctx
            .acquire_shared("pool", MINUTE, 2, AcquireMode::NonBlocking)
            .await?;
        other
            .acquire_shared("pool", MINUTE, 2, AcquireMode::NonBlocking)
            .await?;

        let pending = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.acquire_shared("pool", MINUTE, 2, AcquireMode::Blocking)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending.is_finished());

        ctx.release("pool").await?;
        let queued = pending.await.unwrap()?;

        let holders = ctx.holders("pool").await?;
        assert!(holders.iter().all(|row| row.holder_token != held.token));
        assert!(holders.iter().any(|row| row.holder_token == queued.token));
        assert_eq!(service.registry().outstanding(ctx.id()).await, 1);
        assert_eq!(
            service.registry().peek(ctx.id(), "pool").await,
            Some(queued.token)
        );

        ctx.release("pool").await?;
        assert_eq!(ctx.live_count("pool").await?, 1);
        assert_eq!(service.registry().outstanding(ctx.id()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_lease_leaves_a_taken_over_exclusive_alone() -> Result<()> {
        let service = service();
        let a = service.context("a");
        let b = service.context("b");

        let stale = a
            .acquire_exclusive("reports", Duration::from_millis(30), AcquireMode::NonBlocking)
            .await?;
        tokio::time::sleep(Duration::from_millis(60)).await;
        b.acquire_exclusive("reports", MINUTE, AcquireMode::NonBlocking)
            .await?;

        assert!(matches!(
            a.extend_lease(&stale, MINUTE).await,
            Err(Error::LeaseNotFound { .. })
        ));
        assert!(matches!(
            a.release_lease(&stale).await,
            Err(Error::LeaseNotFound { .. })
        ));

        let holders = b.holders("reports").await?;
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].owner, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_input_touches_nothing() -> Result<()> {
        let service = service();
        let ctx = service.context("worker-1");

        let zero = ctx
            .acquire_shared("pool", MINUTE, 0, AcquireMode::NonBlocking)
            .await;
        assert!(matches!(zero, Err(Error::InvalidArgument(_))));
        let blank = ctx
            .acquire_exclusive("  ", MINUTE, AcquireMode::NonBlocking)
            .await;
        assert!(matches!(blank, Err(Error::InvalidResourceName(_))));

        assert_eq!(service.registry().outstanding(ctx.id()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_service_stops_blocking_acquire() -> Result<()> {
        let (source, cancel) = cancel_pair();
        let slow = RetryPolicy {
            interval: Duration::from_secs(30),
            max_attempts: 10,
        };
        let service = LockService::new(MemoryLeaseStore::new())
            .with_retry_policies(slow, slow)
            .with_cancellation(cancel);

        service
            .context("a")
            .acquire_exclusive("reports", MINUTE, AcquireMode::NonBlocking)
            .await?;

        let waiter = {
            let ctx = service.context("b");
            tokio::spawn(async move {
                ctx.acquire_shared("reports", MINUTE, 1, AcquireMode::Blocking)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(
            service.registry().outstanding(&ContextId::new("b")).await,
            0
        );
        Ok(())
    }
}
