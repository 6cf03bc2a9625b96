//! Rate limiting and memoizing combinators: throttle, sample, cache, share.

use serde::Serialize;
use serde_json::Value;

use super::key::{CombinatorKey, CombinatorKind};
use super::state::{CacheState, SampleState, ShareState, ThrottleState};
use super::Combinators;

/// Result of [`Combinators::cache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cached {
    pub value: Value,
    /// Whether `value` came from the cache rather than this push.
    pub cached: bool,
    pub age_ms: u64,
    pub ttl_ms: u64,
}

/// Result of [`Combinators::share`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shared {
    pub value: Value,
    /// Whether more than one push has gone through this share.
    pub shared: bool,
    pub subscriber_count: u64,
}

impl Combinators {
    /// Emit the first push, then replay the last emitted value for pushes
    /// arriving within `interval_ms` of it.
    pub fn throttle(&self, stream: &str, interval_ms: u64, value: Value) -> Value {
        let key = CombinatorKey::new(CombinatorKind::Throttle, stream, &[Value::from(interval_ms)]);
        let now = self.now();
        self.inner
            .states
            .with::<ThrottleState, _>(key, stream, now, |state| match state.last_emit_ms {
                Some(last) if now.saturating_sub(last) < interval_ms => state.last_value.clone(),
                _ => {
                    state.last_emit_ms = Some(now);
                    state.last_value = value.clone();
                    value
                }
            })
    }

    /// Emit the first push, then at most one push per `interval_ms`.
    pub fn sample(&self, stream: &str, interval_ms: u64, value: Value) -> Option<Value> {
        let key = CombinatorKey::new(CombinatorKind::Sample, stream, &[Value::from(interval_ms)]);
        let now = self.now();
        self.inner
            .states
            .with::<SampleState, _>(key, stream, now, |state| match state.last_sample_ms {
                Some(last) if now.saturating_sub(last) < interval_ms => None,
                _ => {
                    state.last_sample_ms = Some(now);
                    Some(value)
                }
            })
    }

    /// Return the stored value while it is younger than `ttl_ms`. Otherwise
    /// store this push and return it.
    pub fn cache(&self, key: &str, ttl_ms: u64, value: Value) -> Cached {
        let state_key = CombinatorKey::new(CombinatorKind::Cache, key, &[Value::from(ttl_ms)]);
        let now = self.now();
        self.inner
            .states
            .with::<CacheState, _>(state_key, key, now, |state| {
                let age_ms = now.saturating_sub(state.stored_at_ms);
                match &state.value {
                    Some(stored) if age_ms < ttl_ms => Cached {
                        value: stored.clone(),
                        cached: true,
                        age_ms,
                        ttl_ms,
                    },
                    _ => {
                        state.value = Some(value.clone());
                        state.stored_at_ms = now;
                        Cached {
                            value,
                            cached: false,
                            age_ms: 0,
                            ttl_ms,
                        }
                    }
                }
            })
    }

    /// Store and return the latest push, counting how many went through.
    pub fn share(&self, key: &str, value: Value) -> Shared {
        let state_key = CombinatorKey::new(CombinatorKind::Share, key, &[]);
        self.inner
            .states
            .with::<ShareState, _>(state_key, key, self.now(), |state| {
                state.value = value;
                state.subscriber_count += 1;
                Shared {
                    value: state.value.clone(),
                    shared: state.subscriber_count > 1,
                    subscriber_count: state.subscriber_count,
                }
            })
    }
}
