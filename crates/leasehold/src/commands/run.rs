//! `run`: hold a lease for the lifetime of a child process
//!
//! The lease is released whether the child succeeds, fails, cannot be started
//! or is interrupted. With `--renew` the lease is extended in the background
//! at a third of its TTL, so a long command does not outlive its lease.
//! A lease that lapsed while the child ran fails the run with exit code 3
//! instead of passing on the child's code.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::process::ExitStatus;

use anyhow::{Context, Result};
use leasehold_core::{cancel_pair, renewal_interval, spawn_renewal, CancelToken, Error, Lease};
use tokio::process::Command;

use super::{CommandEnv, LockRequest};

/// Options for `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub request: LockRequest,
    pub renew: bool,
    pub command: Vec<String>,
}

/// Run the child under a lease and return its exit code.
///
/// # Errors
///
/// Returns an error if the lease cannot be taken, the child cannot be started,
/// or the run is cancelled
pub async fn run(env: &CommandEnv, resource: &str, options: &RunOptions) -> Result<i32> {
    let request = &options.request;
    let ttl = env.ttl(request.ttl_secs);
    let section = |lease: Lease| supervise(env, lease, options);

    if request.shared {
        env.lock
            .run_shared(resource, ttl, env.limit(request.limit), request.mode(), section)
            .await?
    } else {
        env.lock
            .run_exclusive(resource, ttl, request.mode(), section)
            .await?
    }
}

async fn supervise(env: &CommandEnv, lease: Lease, options: &RunOptions) -> Result<i32> {
    let renewal = options.renew.then(|| {
        let (source, token) = cancel_pair();
        let every = renewal_interval(lease.ttl);
        tracing::debug!(resource = %lease.resource, ?every, "renewing lease in background");
        let handle = spawn_renewal(env.lock.clone(), lease.clone(), every, token);
        (source, handle)
    });

    let cancel = env.lock.service().cancel_token();
    let outcome = run_child(&options.command, &lease.resource, cancel).await;

    if let Some((source, handle)) = renewal {
        source.cancel();
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(resource = %lease.resource, error = %e, "lease was lost while the command ran");
            }
            Err(e) => tracing::warn!(error = %e, "lease renewal task failed"),
        }
    }

    outcome
}

async fn run_child(command: &[String], resource: &str, cancel: &CancelToken) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("No command given to run"))?;

    let mut child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start '{program}'"))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("Failed to wait for '{program}'"))?;
            Ok(exit_code(status))
        }
        () = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to stop '{program}'");
            }
            Err(Error::Cancelled { resource: resource.to_string() }.into())
        }
    }
}

/// Exit code of the child; `128 + signal` when it was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}
