//! Command implementations
//!
//! Each command runs against a [`CommandEnv`]: the loaded configuration, an
//! open lease store and the lock context of this invocation.

pub mod inspect;
pub mod lock;
pub mod run;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use leasehold_core::{
    load_config, load_config_from, AcquireMode, CancelToken, Config, ContextId, LockContext,
    LockService, SqliteLeaseStore,
};
use serde::Serialize;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub db: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub context: Option<String>,
    pub json: bool,
}

/// Lock flavor and wait behavior common to `acquire` and `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub shared: bool,
    pub limit: Option<u32>,
    pub ttl_secs: Option<u64>,
    pub no_wait: bool,
}

impl LockRequest {
    pub const fn mode(&self) -> AcquireMode {
        if self.no_wait {
            AcquireMode::NonBlocking
        } else {
            AcquireMode::Blocking
        }
    }
}

/// Everything a command needs to talk to the lease store.
pub struct CommandEnv {
    pub config: Config,
    pub lock: LockContext<SqliteLeaseStore>,
    pub json: bool,
}

impl CommandEnv {
    /// Load configuration, open the database and bind the calling context.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database cannot be opened
    pub async fn open(options: &GlobalOptions, cancel: CancelToken) -> Result<Self> {
        let mut config = match &options.config {
            Some(path) => load_config_from(path).await?,
            None => load_config().await?,
        };
        if let Some(db) = &options.db {
            config.database = db.display().to_string();
        }

        let store = SqliteLeaseStore::open(&config.database_path(), &config.store.to_options())
            .await
            .with_context(|| format!("Failed to open lease database {}", config.database))?;

        let service = LockService::from_config(store, &config).with_cancellation(cancel);
        let lock = service.context(resolve_context(options.context.as_deref()));

        Ok(Self {
            config,
            lock,
            json: options.json,
        })
    }

    pub fn ttl(&self, ttl_secs: Option<u64>) -> Duration {
        ttl_secs.map_or_else(|| self.config.default_ttl(), Duration::from_secs)
    }

    pub fn limit(&self, limit: Option<u32>) -> u32 {
        limit.unwrap_or(self.config.default_limit)
    }

    /// Print `value` as JSON, or `text` otherwise.
    ///
    /// # Errors
    /// Returns an error if JSON serialization fails
    pub fn emit<T: Serialize>(&self, value: &T, text: &str) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{text}");
        }
        Ok(())
    }
}

/// `--context`, then `$LEASEHOLD_CONTEXT`, then `pid-<pid>`.
fn resolve_context(flag: Option<&str>) -> ContextId {
    flag.map(ContextId::from)
        .or_else(|| {
            std::env::var("LEASEHOLD_CONTEXT")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(ContextId::from)
        })
        .unwrap_or_else(ContextId::process)
}
