//! Error types for leasehold-core
//!
//! Three outcomes must stay distinguishable for callers:
//! - the store could not be consulted (`StoreUnavailable`)
//! - the store answered "no" (`NotAdmitted`, `LeaseNotFound`)
//! - the caller gave up (`Cancelled`)

use thiserror::Error;

/// Core error type for lease operations
#[derive(Debug, Error)]
pub enum Error {
    /// The backing store could not be reached or rejected the statement
    #[error("Lease store unavailable: {0}")]
    StoreUnavailable(String),

    /// The conditional write was evaluated and rejected
    #[error("Lock on '{resource}' was not admitted (limit reached or exclusively held)")]
    NotAdmitted { resource: String },

    /// Release/extend targeted a lease that no longer exists
    #[error("No live lease on '{resource}' for this holder (already released or expired)")]
    LeaseNotFound { resource: String },

    /// A blocking operation was cancelled before it completed
    #[error("Operation on '{resource}' was cancelled")]
    Cancelled { resource: String },

    /// Resource name failed validation
    #[error("Invalid resource name: {0}")]
    InvalidResourceName(String),

    /// TTL, limit or token rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO failure (config files)
    #[error("IO error: {0}")]
    IoError(String),

    /// Parse failure (config files, stored values)
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::NotAdmitted { .. } => "NOT_ADMITTED",
            Self::LeaseNotFound { .. } => "LEASE_NOT_FOUND",
            Self::Cancelled { .. } => "CANCELLED",
            Self::InvalidResourceName(_) => "INVALID_RESOURCE",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::IoError(_) => "IO_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
        }
    }

    /// Process exit code for this error.
    ///
    /// - 1: caller error (bad name, argument, configuration)
    /// - 2: system error (store, IO)
    /// - 3: lease not found
    /// - 4: not admitted
    /// - 130: cancelled by signal
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidResourceName(_)
            | Self::InvalidArgument(_)
            | Self::InvalidConfig(_)
            | Self::ParseError(_) => 1,
            Self::StoreUnavailable(_) | Self::IoError(_) => 2,
            Self::LeaseNotFound { .. } => 3,
            Self::NotAdmitted { .. } => 4,
            Self::Cancelled { .. } => 130,
        }
    }

    /// True when the failure came from the store rather than from the lock state.
    pub const fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub(crate) fn not_admitted(resource: &str) -> Self {
        Self::NotAdmitted {
            resource: resource.to_string(),
        }
    }

    pub(crate) fn lease_not_found(resource: &str) -> Self {
        Self::LeaseNotFound {
            resource: resource.to_string(),
        }
    }

    pub(crate) fn cancelled(resource: &str) -> Self {
        Self::Cancelled {
            resource: resource.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::IoError(format!("Background task failed: {err}"))
    }
}

/// Result type alias for leasehold-core operations
pub type Result<T> = std::result::Result<T, Error>;
