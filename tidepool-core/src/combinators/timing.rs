//! Time-based combinators: debounce, delay and retry backoff.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::key::{CombinatorKey, CombinatorKind};
use super::state::{DebounceState, RetryState};
use super::Combinators;

/// Result of pushing a value through [`Combinators::retry`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Not an error. The attempt counter was reset.
    Value(Value),
    /// An error with retries left. Returned after waiting `delay_ms`.
    Retry {
        attempt: u32,
        delay_ms: u64,
        error: Value,
    },
    /// An error after every retry was used up.
    Exhausted { attempts: u32, error: Value },
    /// The backoff wait was cancelled by shutdown.
    Cancelled,
}

/// Error-shaped values are objects carrying a non-null `error` field.
pub(crate) fn error_of(value: &Value) -> Option<&Value> {
    value.get("error").filter(|error| !error.is_null())
}

/// `base * 2^(attempt - 1)`, saturating.
pub(crate) fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    base_ms.saturating_mul(1u64 << exponent)
}

/// Deregisters a debounce push when it resolves or is dropped.
struct Waiter<'a> {
    combinators: &'a Combinators,
    key: CombinatorKey,
    generation: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.combinators
            .inner
            .states
            .existing::<DebounceState, _>(&self.key, |state| state.waiters.remove(&self.generation));
    }
}

impl Combinators {
    /// Resolve with the latest push once `delay_ms` passes without a newer
    /// push. Superseded and cancelled pushes resolve `None`, as do pushes
    /// whose stream was cleared while they waited.
    pub async fn debounce(&self, stream: &str, delay_ms: u64, value: Value) -> Option<Value> {
        let key = CombinatorKey::new(CombinatorKind::Debounce, stream, &[Value::from(delay_ms)]);
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .states
            .with::<DebounceState, _>(key, stream, self.now(), |state| {
                state.generation = generation;
                state.waiters.insert(generation);
            });
        let _waiter = Waiter {
            combinators: self,
            key,
            generation,
        };

        if !self.sleep(Duration::from_millis(delay_ms)).await {
            return None;
        }

        let latest = self
            .inner
            .states
            .peek::<DebounceState, _>(&key, |state| state.generation);
        (latest == Some(generation)).then_some(value)
    }

    /// Resolve with `value`, unchanged, after `ms`. `None` if cancelled.
    pub async fn delay(&self, ms: u64, value: Value) -> Option<Value> {
        self.sleep(Duration::from_millis(ms)).await.then_some(value)
    }

    /// Back off on error-shaped values.
    ///
    /// The n-th consecutive error waits `base_ms * 2^(n-1)` and reports a
    /// retry, until `max` retries are used up. A value without an error
    /// resets the counter and passes through.
    pub async fn retry(&self, stream: &str, max: u32, base_ms: u64, value: Value) -> RetryOutcome {
        let key = CombinatorKey::new(
            CombinatorKind::Retry,
            stream,
            &[Value::from(max), Value::from(base_ms)],
        );

        let Some(error) = error_of(&value).cloned() else {
            self.inner
                .states
                .with::<RetryState, _>(key, stream, self.now(), |state| state.attempt = 0);
            return RetryOutcome::Value(value);
        };

        let attempt = self
            .inner
            .states
            .with::<RetryState, _>(key, stream, self.now(), |state| {
                state.attempt = state.attempt.saturating_add(1);
                state.attempt
            });

        if attempt > max {
            tracing::debug!(stream, attempts = max, "retries exhausted");
            return RetryOutcome::Exhausted {
                attempts: max,
                error,
            };
        }

        let delay_ms = backoff_ms(base_ms, attempt);
        tracing::trace!(stream, attempt, delay_ms, "retrying after backoff");
        if !self.sleep(Duration::from_millis(delay_ms)).await {
            return RetryOutcome::Cancelled;
        }
        RetryOutcome::Retry {
            attempt,
            delay_ms,
            error,
        }
    }
}
