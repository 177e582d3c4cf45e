//! Holder key registry
//!
//! Remembers, per calling context, which holder tokens that context was issued
//! for each resource, so `release`/`extend` can be called with the resource
//! name alone. Nested acquires of the same resource by one context stack up and
//! are consumed most-recent first.
//!
//! The registry is ergonomics only; mutual exclusion never depends on it.
//!
//! # Example
//!
//! ```ignore
//! let registry = HolderKeyRegistry::new();
//! let ctx = ContextId::new("worker-1");
//! let token = registry.issue(&ctx, "reports").await;
//! assert_eq!(registry.consume(&ctx, "reports").await, Some(token));
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::lease::HolderToken;

/// Identity of a calling context (worker, task, process).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Context identity of the current process.
    #[must_use]
    pub fn process() -> Self {
        Self(format!("pid-{}", std::process::id()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

type ContextEntries = HashMap<String, Vec<HolderToken>>;

/// Registry of outstanding holder tokens, keyed by context then resource.
#[derive(Debug, Clone, Default)]
pub struct HolderKeyRegistry {
    entries: Arc<Mutex<HashMap<ContextId, ContextEntries>>>,
}

impl HolderKeyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh token for `resource` and record it for `context`.
    pub async fn issue(&self, context: &ContextId, resource: &str) -> HolderToken {
        let token = HolderToken::generate(context);
        self.record(context, resource, token.clone()).await;
        token
    }

    /// Record a token `context` already holds a lease for. It becomes the
    /// most recent token for `resource`.
    pub async fn record(&self, context: &ContextId, resource: &str, token: HolderToken) {
        self.entries
            .lock()
            .await
            .entry(context.clone())
            .or_default()
            .entry(resource.to_string())
            .or_default()
            .push(token);
    }

    /// Remove and return the most recent token `context` holds for `resource`.
    ///
    /// Pop-style access for callers that manage leases themselves. The lock
    /// service uses [`Self::peek`] and [`Self::discard`] instead, so a token
    /// stays registered until the store has confirmed the release.
    pub async fn consume(&self, context: &ContextId, resource: &str) -> Option<HolderToken> {
        let mut entries = self.entries.lock().await;
        let per_context = entries.get_mut(context)?;
        let stack = per_context.get_mut(resource)?;
        let token = stack.pop();

        if stack.is_empty() {
            per_context.remove(resource);
        }
        if per_context.is_empty() {
            entries.remove(context);
        }
        token
    }

    /// Most recent token `context` holds for `resource`, left in place.
    pub async fn peek(&self, context: &ContextId, resource: &str) -> Option<HolderToken> {
        self.entries
            .lock()
            .await
            .get(context)
            .and_then(|per_context| per_context.get(resource))
            .and_then(|stack| stack.last().cloned())
    }

    /// Remove one specific token. Returns whether it was present.
    pub async fn discard(&self, context: &ContextId, resource: &str, token: &HolderToken) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(per_context) = entries.get_mut(context) else {
            return false;
        };
        let Some(stack) = per_context.get_mut(resource) else {
            return false;
        };

        let before = stack.len();
        stack.retain(|held| held != token);
        let removed = stack.len() != before;

        if stack.is_empty() {
            per_context.remove(resource);
        }
        if per_context.is_empty() {
            entries.remove(context);
        }
        removed
    }

    /// Number of tokens outstanding for `context` across all resources.
    pub async fn outstanding(&self, context: &ContextId) -> usize {
        self.entries
            .lock()
            .await
            .get(context)
            .map_or(0, |per_context| per_context.values().map(Vec::len).sum())
    }

    /// Drop every token recorded for `context`, returning how many were dropped.
    pub async fn forget_context(&self, context: &ContextId) -> usize {
        self.entries
            .lock()
            .await
            .remove(context)
            .map_or(0, |per_context| per_context.values().map(Vec::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[tokio::test]
    async fn test_issue_then_consume() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");

        let token = registry.issue(&ctx, "reports").await;
        assert_eq!(registry.outstanding(&ctx).await, 1);
        assert_eq!(registry.consume(&ctx, "reports").await, Some(token));
        assert_eq!(registry.consume(&ctx, "reports").await, None);
        assert_eq!(registry.outstanding(&ctx).await, 0);
    }

    #[tokio::test]
    async fn test_nested_tokens_are_consumed_most_recent_first() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");

        let outer = registry.issue(&ctx, "reports").await;
        let inner = registry.issue(&ctx, "reports").await;

        assert_eq!(registry.peek(&ctx, "reports").await, Some(inner.clone()));
        assert_eq!(registry.consume(&ctx, "reports").await, Some(inner));
        assert_eq!(registry.consume(&ctx, "reports").await, Some(outer));
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let registry = HolderKeyRegistry::new();
        let a = ContextId::new("a");
        let b = ContextId::new("b");

        let token_a = registry.issue(&a, "reports").await;
        assert_eq!(registry.consume(&b, "reports").await, None);
        assert_eq!(registry.consume(&a, "reports").await, Some(token_a));
    }

    #[tokio::test]
    async fn test_discard_removes_only_the_given_token() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");

        let first = registry.issue(&ctx, "reports").await;
        let second = registry.issue(&ctx, "reports").await;

        assert!(registry.discard(&ctx, "reports", &second).await);
        assert!(!registry.discard(&ctx, "reports", &second).await);
        assert_eq!(registry.consume(&ctx, "reports").await, Some(first));
    }

    #[tokio::test]
    async fn test_record_pushes_existing_token() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");

        let issued = registry.issue(&ctx, "reports").await;
        let held = HolderToken::generate(&ctx);
        registry.record(&ctx, "reports", held.clone()).await;

        assert_eq!(registry.peek(&ctx, "reports").await, Some(held.clone()));
        assert_eq!(registry.consume(&ctx, "reports").await, Some(held));
        assert_eq!(registry.consume(&ctx, "reports").await, Some(issued));
    }

    #[tokio::test]
    async fn test_forget_context() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");
        let other = ContextId::new("worker-2");

        registry.issue(&ctx, "a").await;
        registry.issue(&ctx, "b").await;
        registry.issue(&other, "a").await;

        assert_eq!(registry.forget_context(&ctx).await, 2);
        assert_eq!(registry.outstanding(&ctx).await, 0);
        assert_eq!(registry.outstanding(&other).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_issue_from_one_context() {
        let registry = HolderKeyRegistry::new();
        let ctx = ContextId::new("worker-1");

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                registry.issue(&ctx, &format!("resource-{}", i % 4)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.outstanding(&ctx).await, 32);
    }

    proptest! {
        #[test]
        fn prop_consume_returns_tokens_in_reverse_issue_order(count in 1usize..16) {
            let registry = HolderKeyRegistry::new();
            let ctx = ContextId::new("prop");

            let (issued, consumed) = tokio_test::block_on(async {
                let mut issued = Vec::new();
                for _ in 0..count {
                    issued.push(registry.issue(&ctx, "r").await);
                }
                let mut consumed = Vec::new();
                while let Some(token) = registry.consume(&ctx, "r").await {
                    consumed.push(token);
                }
                (issued, consumed)
            });

            let mut expected = issued;
            expected.reverse();
            prop_assert_eq!(consumed, expected);
        }
    }
}
