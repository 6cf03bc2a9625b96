//! Pool Implementation
//!
//! A pool is a named reactive cell. It holds a current value, a bounded
//! history of the values it has held, and bookkeeping metadata.
//!
//! # Invariants
//!
//! - The last history entry always equals `current`. The initial value is
//!   recorded as the first entry.
//! - History never exceeds the configured limit. The oldest entries are
//!   dropped first.
//!
//! Pools are plain data. Locking, propagation and lookup by name are the
//! job of the [`PoolStore`](super::PoolStore).

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;

use super::transform::Transform;

/// How a derived pool is computed from its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derivation {
    pub source: String,
    pub transform: Transform,
}

/// Bookkeeping kept alongside a pool's value. Timestamps are clock
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMeta {
    pub created_at_ms: u64,
    pub update_count: u64,
    pub last_update_at_ms: Option<u64>,
    pub last_access_at_ms: u64,
    pub derivation: Option<Derivation>,
}

impl PoolMeta {
    /// Most recent read or write.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_update_at_ms
            .map_or(self.last_access_at_ms, |t| t.max(self.last_access_at_ms))
    }
}

#[derive(Debug, Clone)]
pub struct Pool {
    name: String,
    current: Value,
    history: VecDeque<Value>,
    meta: PoolMeta,
}

impl Pool {
    pub fn new(name: impl Into<String>, initial: Value, now_ms: u64) -> Self {
        let mut history = VecDeque::new();
        history.push_back(initial.clone());
        Self {
            name: name.into(),
            current: initial,
            history,
            meta: PoolMeta {
                created_at_ms: now_ms,
                update_count: 0,
                last_update_at_ms: None,
                last_access_at_ms: now_ms,
                derivation: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> &Value {
        &self.current
    }

    pub fn meta(&self) -> &PoolMeta {
        &self.meta
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Oldest retained value.
    pub fn oldest(&self) -> Option<&Value> {
        self.history.front()
    }

    /// History from oldest to newest, keeping only the newest `limit`
    /// entries when a limit is given.
    pub fn history(&self, limit: Option<usize>) -> Vec<Value> {
        let skip = limit.map_or(0, |limit| self.history.len().saturating_sub(limit));
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Write a new value, returning the previous one.
    pub fn record(&mut self, value: Value, now_ms: u64, history_limit: usize) -> Value {
        self.history.push_back(value.clone());
        while self.history.len() > history_limit.max(1) {
            self.history.pop_front();
        }
        self.meta.update_count += 1;
        self.meta.last_update_at_ms = Some(now_ms);
        std::mem::replace(&mut self.current, value)
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.meta.last_access_at_ms = now_ms;
    }

    pub fn derivation(&self) -> Option<&Derivation> {
        self.meta.derivation.as_ref()
    }

    pub(crate) fn set_derivation(&mut self, derivation: Option<Derivation>) {
        self.meta.derivation = derivation;
    }

    /// Rough in-memory footprint: the encoded size of the current value and
    /// history, plus the name.
    pub fn approx_memory_bytes(&self) -> usize {
        let encoded = |value: &Value| rmp_serde::to_vec(value).map_or(0, |bytes| bytes.len());
        let history: usize = self.history.iter().map(encoded).sum();
        self.name.len() + encoded(&self.current) + history
    }

    pub fn snapshot(&self, subscriber_count: usize) -> PoolSnapshot {
        PoolSnapshot {
            name: self.name.clone(),
            value: self.current.clone(),
            history_size: self.history.len(),
            subscriber_count,
            meta: self.meta.clone(),
        }
    }
}

/// Counters reported by [`PoolStore::stats`](super::PoolStore::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub update_count: u64,
    pub subscriber_count: usize,
    pub history_size: usize,
    pub approx_memory_bytes: usize,
}

/// Serializable view of a pool for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub value: Value,
    pub history_size: usize,
    pub subscriber_count: usize,
    #[serde(flatten)]
    pub meta: PoolMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_value_is_in_history() {
        let pool = Pool::new("count", json!(0), 5);
        assert_eq!(pool.current(), &json!(0));
        assert_eq!(pool.history(None), vec![json!(0)]);
        assert_eq!(pool.meta().created_at_ms, 5);
        assert_eq!(pool.meta().update_count, 0);
    }

    #[test]
    fn record_keeps_history_bounded() {
        let mut pool = Pool::new("count", json!(0), 0);
        for i in 1..=5 {
            pool.record(json!(i), i, 3);
        }
        assert_eq!(pool.history(None), vec![json!(3), json!(4), json!(5)]);
        assert_eq!(pool.history(None).last(), Some(pool.current()));
        assert_eq!(pool.meta().update_count, 5);
        assert_eq!(pool.meta().last_update_at_ms, Some(5));
    }

    #[test]
    fn history_limit_keeps_newest() {
        let mut pool = Pool::new("count", json!(0), 0);
        pool.record(json!(1), 1, 10);
        pool.record(json!(2), 2, 10);
        assert_eq!(pool.history(Some(2)), vec![json!(1), json!(2)]);
        assert_eq!(pool.history(Some(10)).len(), 3);
        assert!(pool.history(Some(0)).is_empty());
    }

    #[test]
    fn zero_limit_still_keeps_current() {
        let mut pool = Pool::new("count", json!(0), 0);
        pool.record(json!(1), 1, 0);
        assert_eq!(pool.history(None), vec![json!(1)]);
    }

    #[test]
    fn last_activity_uses_latest_timestamp() {
        let mut pool = Pool::new("count", json!(0), 10);
        assert_eq!(pool.meta().last_activity_ms(), 10);
        pool.record(json!(1), 30, 10);
        pool.touch(20);
        assert_eq!(pool.meta().last_activity_ms(), 30);
    }

    #[test]
    fn memory_estimate_grows_with_history() {
        let mut pool = Pool::new("p", json!("x"), 0);
        let before = pool.approx_memory_bytes();
        pool.record(json!("a much longer string value"), 1, 10);
        assert!(pool.approx_memory_bytes() > before);
    }
}
