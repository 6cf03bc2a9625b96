//! Subscriber types for the reactive system.
//!
//! A pool's dependents are either other pools derived from it or external
//! subscribers, identified by an opaque [`SubscriberToken`] that the host
//! hands in (typically the identity of the node currently being evaluated).
//! Rerunning an external subscriber is the host's job, exposed to the store
//! through the [`SubscriberRunner`] capability.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Opaque identity of an external subscriber.
///
/// Tokens compare by their string form, so the host may mint them from
/// whatever identity it already has.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberToken(String);

impl SubscriberToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh token, unique within this process.
    pub fn unique() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(format!("subscriber-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberToken {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubscriberToken {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Something that is notified when a pool changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Dependent {
    /// A derived pool, recomputed through its transform.
    Pool(String),

    /// An external subscriber, rerun through the [`SubscriberRunner`].
    Token(SubscriberToken),
}

impl Dependent {
    pub fn pool(name: impl Into<String>) -> Self {
        Dependent::Pool(name.into())
    }

    pub fn token(token: impl Into<SubscriberToken>) -> Self {
        Dependent::Token(token.into())
    }

    pub fn as_pool(&self) -> Option<&str> {
        match self {
            Dependent::Pool(name) => Some(name),
            Dependent::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&SubscriberToken> {
        match self {
            Dependent::Token(token) => Some(token),
            Dependent::Pool(_) => None,
        }
    }
}

/// Host capability that reruns an external subscriber after a pool it
/// depends on changed.
///
/// The store never holds a lock while calling `run`, so a runner may read
/// and write pools.
pub trait SubscriberRunner: Send + Sync {
    fn run(&self, token: &SubscriberToken, source: &str, value: &Value) -> Result<()>;
}

impl<F> SubscriberRunner for F
where
    F: Fn(&SubscriberToken, &str, &Value) -> Result<()> + Send + Sync,
{
    fn run(&self, token: &SubscriberToken, source: &str, value: &Value) -> Result<()> {
        self(token, source, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_tokens_differ() {
        let a = SubscriberToken::unique();
        let b = SubscriberToken::unique();
        assert_ne!(a, b);
    }

    #[test]
    fn dependent_accessors() {
        let pool = Dependent::pool("celsius");
        let token = Dependent::token("node-7");

        assert_eq!(pool.as_pool(), Some("celsius"));
        assert!(pool.as_token().is_none());
        assert_eq!(token.as_token().map(SubscriberToken::as_str), Some("node-7"));
    }

    #[test]
    fn dependent_serializes_tagged() {
        let json = serde_json::to_value(Dependent::token("n1")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "token", "id": "n1"}));
    }
}
