//! Scoped acquisition and lease renewal.
//!
//! `run_exclusive` / `run_shared` acquire a lease, run a critical section and
//! release the lease on every exit path, including a panic inside the section.
//! The panic is re-raised after the release. A lease that lapsed during the
//! section is not released on anyone else's behalf: the section's result is
//! replaced by [`crate::Error::LeaseNotFound`].

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{future::Future, panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    cancel::CancelToken,
    retry::AcquireMode,
    service::{Lease, LockContext},
    store::LeaseStore,
    Result,
};

impl<S: LeaseStore> LockContext<S> {
    /// Run `section` while holding the exclusive lease on `resource`.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        resource: &str,
        ttl: Duration,
        mode: AcquireMode,
        section: F,
    ) -> Result<T>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire_exclusive(resource, ttl, mode).await?;
        self.run_holding(lease, section).await
    }

    /// Run `section` while holding one of `limit` shared slots on `resource`.
    pub async fn run_shared<F, Fut, T>(
        &self,
        resource: &str,
        ttl: Duration,
        limit: u32,
        mode: AcquireMode,
        section: F,
    ) -> Result<T>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire_shared(resource, ttl, limit, mode).await?;
        self.run_holding(lease, section).await
    }

    async fn run_holding<F, Fut, T>(&self, lease: Lease, section: F) -> Result<T>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(section(lease.clone()))
            .catch_unwind()
            .await;

        let released = self.release_lease(&lease).await;

        match outcome {
            Ok(value) => released.map(|()| value),
            Err(panic) => {
                if let Err(e) = released {
                    warn!(resource = %lease.resource, error = %e, "failed to release lease after critical section");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Extend `lease` by its own TTL every `every` until `cancel` fires.
///
/// The task ends with `Ok(())` when cancelled and with the error when an
/// extension fails, e.g. [`crate::Error::LeaseNotFound`] once the lease has been lost.
pub fn spawn_renewal<S>(
    context: LockContext<S>,
    lease: Lease,
    every: Duration,
    cancel: CancelToken,
) -> JoinHandle<Result<()>>
where
    S: LeaseStore + 'static,
{
    tokio::spawn(async move {
        loop {
            if !cancel.sleep(every).await {
                debug!(resource = %lease.resource, "lease renewal stopped");
                return Ok(());
            }

            match context.extend_lease(&lease, lease.ttl).await {
                Ok(()) => debug!(resource = %lease.resource, "lease renewed"),
                Err(e) => {
                    warn!(resource = %lease.resource, error = %e, "lease renewal failed");
                    return Err(e);
                }
            }
        }
    })
}

/// Renewal cadence for a lease of `ttl`: a third of the TTL, at least 10 ms.
#[must_use]
pub fn renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(10))
}
