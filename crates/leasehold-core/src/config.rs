//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `~/.config/leasehold/config.toml`
//! 3. Project config: `.leasehold/config.toml`
//! 4. Environment variables: `LEASEHOLD_*`
//! 5. CLI flags (command-specific)
//!
//! An explicit file given with [`load_config_from`] replaces steps 2 and 3.
//!
//! # Example Config
//!
//! ```toml
//! database = "/var/lib/leasehold/leases.db"
//! default_ttl_secs = 120
//! default_limit = 4
//!
//! [shared_retry]
//! interval_ms = 5000
//! max_attempts = 120
//!
//! [wait]
//! poll_interval_ms = 1000
//!
//! [store]
//! busy_timeout_ms = 5000
//! max_connections = 5
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{retry::RetryPolicy, store::sqlite::SqliteStoreOptions, Error, Result};

/// Database path used when nothing else is configured.
pub const DEFAULT_DATABASE: &str = ".leasehold/leases.db";

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_LIMIT: u32 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Path of the `SQLite` lease database.
    pub database: String,
    /// Lease TTL when a command does not give one.
    pub default_ttl_secs: u64,
    /// Shared-lock limit when a command does not give one.
    pub default_limit: u32,
    pub shared_retry: RetryConfig,
    pub exclusive_retry: RetryConfig,
    pub wait: WaitConfig,
    pub store: StoreConfig,
}

/// Overrides for one retry policy. Unset fields keep the built-in policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

/// One config file as written: only the keys it sets are `Some`, so a layer
/// can put a value back to its default.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct ConfigFile {
    database: Option<String>,
    default_ttl_secs: Option<u64>,
    default_limit: Option<u32>,
    shared_retry: RetryConfig,
    exclusive_retry: RetryConfig,
    wait: WaitFile,
    store: StoreFile,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct WaitFile {
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct StoreFile {
    busy_timeout_ms: Option<u64>,
    max_connections: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            default_limit: DEFAULT_LIMIT,
            shared_retry: RetryConfig::default(),
            exclusive_retry: RetryConfig::default(),
            wait: WaitConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl RetryConfig {
    /// Apply these overrides on top of `base`.
    #[must_use]
    pub fn resolve(&self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            interval: self
                .interval_ms
                .map_or(base.interval, Duration::from_millis),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
        }
    }

    fn merge(&mut self, other: Self) {
        if other.interval_ms.is_some() {
            self.interval_ms = other.interval_ms;
        }
        if other.max_attempts.is_some() {
            self.max_attempts = other.max_attempts;
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn to_options(&self) -> SqliteStoreOptions {
        SqliteStoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_connections: self.max_connections,
        }
    }
}

impl Config {
    #[must_use]
    pub fn shared_policy(&self) -> RetryPolicy {
        self.shared_retry.resolve(RetryPolicy::SHARED)
    }

    #[must_use]
    pub fn exclusive_policy(&self) -> RetryPolicy {
        self.exclusive_retry.resolve(RetryPolicy::EXCLUSIVE)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait.poll_interval_ms)
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database)
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(database) = file.database {
            self.database = database;
        }
        if let Some(ttl) = file.default_ttl_secs {
            self.default_ttl_secs = ttl;
        }
        if let Some(limit) = file.default_limit {
            self.default_limit = limit;
        }
        self.shared_retry.merge(file.shared_retry);
        self.exclusive_retry.merge(file.exclusive_retry);
        if let Some(interval) = file.wait.poll_interval_ms {
            self.wait.poll_interval_ms = interval;
        }
        if let Some(timeout) = file.store.busy_timeout_ms {
            self.store.busy_timeout_ms = timeout;
        }
        if let Some(connections) = file.store.max_connections {
            self.store.max_connections = connections;
        }
    }

    /// Apply `LEASEHOLD_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("LEASEHOLD_DATABASE") {
            self.database = value;
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_DEFAULT_TTL_SECS")? {
            self.default_ttl_secs = value;
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_DEFAULT_LIMIT")? {
            self.default_limit = value;
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_SHARED_RETRY_INTERVAL_MS")? {
            self.shared_retry.interval_ms = Some(value);
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_SHARED_RETRY_MAX_ATTEMPTS")? {
            self.shared_retry.max_attempts = Some(value);
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_EXCLUSIVE_RETRY_INTERVAL_MS")? {
            self.exclusive_retry.interval_ms = Some(value);
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_EXCLUSIVE_RETRY_MAX_ATTEMPTS")? {
            self.exclusive_retry.max_attempts = Some(value);
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_WAIT_POLL_INTERVAL_MS")? {
            self.wait.poll_interval_ms = value;
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_STORE_BUSY_TIMEOUT_MS")? {
            self.store.busy_timeout_ms = value;
        }
        if let Some(value) = parse_env(&lookup, "LEASEHOLD_STORE_MAX_CONNECTIONS")? {
            self.store.max_connections = value;
        }
        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::InvalidConfig("database must not be empty".to_string()));
        }
        if self.default_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.default_limit == 0 {
            return Err(Error::InvalidConfig(
                "default_limit must be at least 1".to_string(),
            ));
        }
        if self.wait.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "wait.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "store.max_connections must be at least 1".to_string(),
            ));
        }

        for (name, policy) in [
            ("shared_retry", self.shared_policy()),
            ("exclusive_retry", self.exclusive_policy()),
        ] {
            if policy.max_attempts == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
            if policy.total_wait() != RetryPolicy::DEFAULT_BOUND {
                tracing::warn!(
                    policy = name,
                    total_secs = policy.total_wait().as_secs(),
                    default_secs = RetryPolicy::DEFAULT_BOUND.as_secs(),
                    "retry policy bound differs from the default"
                );
            }
        }

        Ok(())
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("Invalid {key} value: {e}")))
        })
        .transpose()
}

/// Load configuration from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - Config file is malformed TOML
/// - An environment override does not parse
/// - Config values fail validation
pub async fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Ok(global_path) = global_config_path() {
        if global_path.exists() {
            config.merge(load_toml_file(&global_path).await?);
        }
    }

    if let Ok(project_path) = project_config_path() {
        if project_path.exists() {
            config.merge(load_toml_file(&project_path).await?);
        }
    }

    config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from one explicit file, then environment overrides.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed, or validation fails
pub async fn load_config_from(path: &Path) -> Result<Config> {
    let mut config = Config::default();
    config.merge(load_toml_file(path).await?);
    config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Get path to project config file
fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".leasehold/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

/// Get path to global config file
fn global_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "leasehold")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
        .ok_or_else(|| Error::IoError("Failed to determine global config directory".to_string()))
}

async fn load_toml_file(path: &Path) -> Result<ConfigFile> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))
}
