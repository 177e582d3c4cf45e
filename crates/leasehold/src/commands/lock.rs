//! `acquire`, `release` and `extend`
//!
//! A lease taken by `acquire` outlives this process: it stays in the database
//! until released or until its TTL runs out. Shared leases are released by
//! token, so `acquire --shared` prints the token.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use anyhow::Result;
use leasehold_core::{HolderToken, Lease};
use serde_json::json;

use super::{CommandEnv, LockRequest};

/// Acquire a lease per `request` and print it.
///
/// # Errors
///
/// Returns an error if:
/// - Resource name, ttl or limit is invalid
/// - The lease is not admitted (after polling, unless `--no-wait`)
/// - The store is unavailable or the wait is cancelled
pub async fn acquire(env: &CommandEnv, resource: &str, request: &LockRequest) -> Result<()> {
    let lease = take(env, resource, request).await?;

    let text = if lease.is_exclusive() {
        format!("Acquired exclusive lock on '{resource}'")
    } else {
        format!(
            "Acquired shared lock on '{resource}' ({})\n  Token: {}",
            lease.kind, lease.token
        )
    };
    env.emit(&lease, &format!("{text}\n  Owner: {}\n  TTL: {}s", lease.owner, lease.ttl.as_secs()))
}

/// Release the lease identified by `token`, or the exclusive lease.
///
/// # Errors
///
/// Returns an error if no live lease matches or the store is unavailable
pub async fn release(env: &CommandEnv, resource: &str, token: Option<&str>) -> Result<()> {
    let token = parse_token(token)?;
    env.lock.release_with_token(resource, &token).await?;

    env.emit(
        &json!({ "resource": resource, "token": token, "released": true }),
        &format!("Released lock on '{resource}'"),
    )
}

/// Extend the lease identified by `token`, or the exclusive lease.
///
/// # Errors
///
/// Returns an error if no live lease matches or the store is unavailable
pub async fn extend(
    env: &CommandEnv,
    resource: &str,
    token: Option<&str>,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let token = parse_token(token)?;
    let ttl = env.ttl(ttl_secs);
    env.lock.extend_with_token(resource, &token, ttl).await?;

    env.emit(
        &json!({ "resource": resource, "token": token, "ttl_secs": ttl.as_secs() }),
        &format!("Extended lock on '{resource}' by {}s", ttl.as_secs()),
    )
}

/// Take a lease per `request`.
async fn take(env: &CommandEnv, resource: &str, request: &LockRequest) -> Result<Lease> {
    let ttl = env.ttl(request.ttl_secs);
    let lease = if request.shared {
        env.lock
            .acquire_shared(resource, ttl, env.limit(request.limit), request.mode())
            .await?
    } else {
        env.lock
            .acquire_exclusive(resource, ttl, request.mode())
            .await?
    };
    Ok(lease)
}

fn parse_token(token: Option<&str>) -> Result<HolderToken> {
    Ok(token
        .map(HolderToken::parse)
        .transpose()?
        .unwrap_or_else(HolderToken::exclusive))
}
