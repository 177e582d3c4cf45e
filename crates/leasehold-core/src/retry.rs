//! Bounded polling over single-attempt acquires.
//!
//! A blocking acquire is a fixed number of single attempts separated by a
//! fixed sleep. The loop stops on the first success, the first store error,
//! cancellation, or when the attempt budget runs out. There is no sleep after
//! the final attempt.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{cancel::CancelToken, Error, Result};

/// Whether an acquire polls until admitted or makes exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Interval and attempt budget for a blocking acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between attempts
    pub interval: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Shared locks: 5 s between 120 attempts.
    pub const SHARED: Self = Self {
        interval: Duration::from_secs(5),
        max_attempts: 120,
    };

    /// Exclusive locks: 3 s between 200 attempts.
    pub const EXCLUSIVE: Self = Self {
        interval: Duration::from_secs(3),
        max_attempts: 200,
    };

    /// Ceiling both default policies are sized to.
    pub const DEFAULT_BOUND: Duration = Duration::from_secs(600);

    #[must_use]
    pub const fn single_attempt() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts.max(1))
    }

    /// The policy itself for blocking mode, one attempt otherwise.
    #[must_use]
    pub const fn for_mode(self, mode: AcquireMode) -> Self {
        match mode {
            AcquireMode::Blocking => self,
            AcquireMode::NonBlocking => Self::single_attempt(),
        }
    }
}

/// Run `attempt` until it returns `Ok(true)` or the policy is exhausted.
///
/// Returns `Ok(false)` when every attempt was refused. A store error aborts
/// the loop immediately. Cancellation during a sleep yields `Error::Cancelled`.
pub async fn retry_acquire<F, Fut>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    resource: &str,
    mut attempt: F,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = policy.max_attempts.max(1);

    for n in 1..=attempts {
        if attempt().await? {
            if n > 1 {
                debug!(resource, attempt = n, "admitted after retry");
            }
            return Ok(true);
        }

        if n == attempts {
            break;
        }

        debug!(
            resource,
            attempt = n,
            max_attempts = attempts,
            "not admitted, retrying in {:?}",
            policy.interval
        );
        if !cancel.sleep(policy.interval).await {
            return Err(Error::cancelled(resource));
        }
    }

    if attempts > 1 {
        warn!(resource, attempts, "gave up waiting for lock");
    }
    Ok(false)
}
