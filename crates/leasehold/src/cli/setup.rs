//! Global setup utilities for CLI initialization
//!
//! - Early flag parsing (`--json`) so errors can be reported in the right format
//! - Logging initialization with tracing
//! - Signal handling that cancels blocking lock operations

use anyhow::Result;
use leasehold_core::CancelSource;

/// Whether `--json` appears anywhere on the command line.
pub fn json_requested() -> bool {
    std::env::args().any(|arg| arg == "--json")
}

/// Initialize tracing subscriber for logging
///
/// Configures the tracing subscriber with:
/// - Environment filter (defaults to INFO level)
/// - Stderr output, so stdout carries only command results
///
/// # Errors
/// Returns an error if the subscriber initialization fails
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}

/// Cancel `source` on the first SIGINT or SIGTERM (Ctrl-C elsewhere).
///
/// # Errors
/// Returns an error if the signal handlers cannot be installed
pub fn cancel_on_signal(source: CancelSource) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT: {e}"))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM: {e}"))?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            }
            source.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
                source.cancel();
            }
        });
    }

    Ok(())
}
