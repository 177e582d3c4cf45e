//! Lease data model
//!
//! A lease is one row in the store: `(resource_name, holder_token)` plus an
//! absolute expiry. Exclusive leases all share the [`EXCLUSIVE_TOKEN`] sentinel,
//! which turns exclusivity into a uniqueness constraint on that pair.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{registry::ContextId, Error, Result};

/// Holder token used by every exclusive lease.
pub const EXCLUSIVE_TOKEN: &str = "SINGLE_LOCK";

/// Reserved keywords that cannot be used as resource names
const RESERVED_KEYWORDS: &[&str] = &["null", "undefined", "true", "false", "none", "nil", "void"];

/// Opaque identifier of one lease grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderToken(String);

impl HolderToken {
    /// The sentinel token shared by all exclusive leases.
    #[must_use]
    pub fn exclusive() -> Self {
        Self(EXCLUSIVE_TOKEN.to_string())
    }

    /// A fresh token for a shared lease taken by `context`.
    #[must_use]
    pub fn generate(context: &ContextId) -> Self {
        Self(format!("{}:{context}", Uuid::new_v4().simple()))
    }

    /// Wrap a token received from elsewhere (e.g. a CLI flag).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument(
                "holder token cannot be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.0 == EXCLUSIVE_TOKEN
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock flavor of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockKind {
    /// Single holder.
    Exclusive,
    /// Up to `limit` concurrent holders.
    Shared { limit: u32 },
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared { limit } => write!(f, "shared(limit={limit})"),
        }
    }
}

/// A persisted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRow {
    /// Resource being protected
    pub resource_name: String,
    /// Lease identity within the resource
    pub holder_token: HolderToken,
    /// Calling context that took the lease
    pub owner: String,
    /// When acquired
    pub acquired_at: DateTime<Utc>,
    /// Lease is dead once `now > expires_at`
    pub expires_at: DateTime<Utc>,
}

impl LeaseRow {
    /// Check if the lease is dead at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.holder_token.is_exclusive()
    }

    /// Same token, and same owner when `owner` is given.
    pub(crate) fn matches(&self, token: &HolderToken, owner: Option<&str>) -> bool {
        &self.holder_token == token && owner.map_or(true, |owner| self.owner == owner)
    }
}

/// Absolute expiry for a lease taken at `now` with the given TTL.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| Error::InvalidArgument(format!("ttl {ttl:?} is out of range")))
}

/// Reject zero TTLs, which would produce leases that are dead on arrival.
pub fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(Error::InvalidArgument(
            "ttl must be greater than zero".to_string(),
        ));
    }
    expiry_after(Utc::now(), ttl).map(|_| ())
}

/// Reject shared limits that could never admit anyone.
pub fn validate_limit(limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidArgument(
            "shared lock limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Validate a resource name
pub fn validate_resource_name(resource: &str) -> Result<()> {
    let trimmed = resource.trim();

    if trimmed.is_empty() {
        return Err(Error::InvalidResourceName(
            "Resource name cannot be empty or whitespace-only".to_string(),
        ));
    }

    if trimmed.len() != resource.len() {
        return Err(Error::InvalidResourceName(format!(
            "Resource name '{resource}' has leading or trailing whitespace"
        )));
    }

    // Check for reserved keywords (case-insensitive)
    let lower = trimmed.to_lowercase();
    if RESERVED_KEYWORDS.iter().any(|&keyword| keyword == lower) {
        return Err(Error::InvalidResourceName(format!(
            "Resource name '{trimmed}' is a reserved keyword"
        )));
    }

    if !trimmed.chars().any(char::is_alphanumeric) {
        return Err(Error::InvalidResourceName(
            "Resource name must contain at least one alphanumeric character".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("session:test").is_ok());
        assert!(validate_resource_name("com.example.Reports.nightly").is_ok());
        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name("   ").is_err());
        assert!(validate_resource_name("null").is_err());
        assert!(validate_resource_name("NONE").is_err());
        assert!(validate_resource_name(":::").is_err());
        assert!(validate_resource_name(" padded ").is_err());
    }

    #[test]
    fn test_generated_tokens_are_unique_and_carry_context() {
        let ctx = ContextId::new("worker-7");
        let a = HolderToken::generate(&ctx);
        let b = HolderToken::generate(&ctx);

        assert_ne!(a, b);
        assert!(a.as_str().ends_with(":worker-7"));
        assert!(!a.is_exclusive());
        assert!(HolderToken::exclusive().is_exclusive());
    }

    #[test]
    fn test_parse_token_rejects_blank() {
        assert!(HolderToken::parse("  ").is_err());
        assert_eq!(
            HolderToken::parse(" SINGLE_LOCK ").map(|t| t.is_exclusive()).ok(),
            Some(true)
        );
    }

    #[test]
    fn test_lease_row_expiry_is_strict() {
        let now = Utc::now();
        let row = LeaseRow {
            resource_name: "r".into(),
            holder_token: HolderToken::exclusive(),
            owner: "pid-1".into(),
            acquired_at: now,
            expires_at: now,
        };
        assert!(!row.is_expired_at(now));
        assert!(row.is_expired_at(now + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_ttl_and_limit_validation() {
        assert!(validate_ttl(Duration::ZERO).is_err());
        assert!(validate_ttl(Duration::from_millis(1)).is_ok());
        assert!(validate_ttl(Duration::MAX).is_err());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
    }

    #[test]
    fn test_lock_kind_serializes_with_tag() -> std::result::Result<(), toml::ser::Error> {
        #[derive(Serialize)]
        struct Wrapper {
            lock: LockKind,
        }
        let text = toml::to_string(&Wrapper {
            lock: LockKind::Shared { limit: 3 },
        })?;
        assert!(text.contains("kind = \"shared\""));
        assert!(text.contains("limit = 3"));
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_names_with_alphanumerics_are_accepted(name in "[a-z][a-z0-9._:-]{0,40}") {
            prop_assume!(!RESERVED_KEYWORDS.contains(&name.as_str()));
            prop_assert!(validate_resource_name(&name).is_ok());
        }

        #[test]
        fn prop_punctuation_only_names_are_rejected(name in "[-._:/]{1,20}") {
            prop_assert!(validate_resource_name(&name).is_err());
        }
    }
}
