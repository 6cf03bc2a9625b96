//! Keyed subscription state.
//!
//! Each combinator instance keeps its own typed state (a timer, a buffer, a
//! counter) in one shared [`DashMap`], created on first push and removed by
//! `clear`, `reap_idle` or `shutdown`. Removing a buffer state aborts its
//! pending timeout task. Reaping skips states with a debounce waiter or an
//! armed buffer timer.

use std::collections::HashSet;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::AbortHandle;

use super::key::CombinatorKey;

#[derive(Debug, Default)]
pub(crate) struct DebounceState {
    pub generation: u64,
    /// Generations of pushes still waiting out their delay.
    pub waiters: HashSet<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct ThrottleState {
    pub last_emit_ms: Option<u64>,
    pub last_value: Value,
}

#[derive(Debug, Default)]
pub(crate) struct BufferState {
    pub items: Vec<Value>,
    pub generation: u64,
    pub timer: Option<AbortHandle>,
}

impl BufferState {
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for BufferState {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub value: Option<Value>,
    pub stored_at_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ShareState {
    pub value: Value,
    pub subscriber_count: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub attempt: u32,
}

#[derive(Debug, Default)]
pub(crate) struct SampleState {
    pub last_sample_ms: Option<u64>,
}

/// Last value seen or emitted, for audit and distinct.
#[derive(Debug, Default)]
pub(crate) struct LastValueState {
    pub last: Option<Value>,
}

/// Whether the notifier token has been seen, for take/skip until.
#[derive(Debug, Default)]
pub(crate) struct GateState {
    pub triggered: bool,
}

#[derive(Debug)]
pub(crate) enum StateSlot {
    Debounce(DebounceState),
    Throttle(ThrottleState),
    Buffer(BufferState),
    Cache(CacheState),
    Share(ShareState),
    Retry(RetryState),
    Sample(SampleState),
    LastValue(LastValueState),
    Gate(GateState),
}

/// A typed state that can live in a [`StateSlot`].
pub(crate) trait Slot: Default {
    fn wrap(self) -> StateSlot;
    fn get(slot: &StateSlot) -> Option<&Self>;
    fn get_mut(slot: &mut StateSlot) -> Option<&mut Self>;
}

macro_rules! impl_slot {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl Slot for $ty {
                fn wrap(self) -> StateSlot {
                    StateSlot::$variant(self)
                }

                fn get(slot: &StateSlot) -> Option<&Self> {
                    match slot {
                        StateSlot::$variant(state) => Some(state),
                        _ => None,
                    }
                }

                fn get_mut(slot: &mut StateSlot) -> Option<&mut Self> {
                    match slot {
                        StateSlot::$variant(state) => Some(state),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_slot! {
    Debounce => DebounceState,
    Throttle => ThrottleState,
    Buffer => BufferState,
    Cache => CacheState,
    Share => ShareState,
    Retry => RetryState,
    Sample => SampleState,
    LastValue => LastValueState,
    Gate => GateState,
}

#[derive(Debug)]
pub(crate) struct SubscriptionState {
    pub stream: String,
    pub last_touched_ms: u64,
    pub slot: StateSlot,
}

impl SubscriptionState {
    /// Whether a pending wait or timer still depends on this state.
    pub fn is_busy(&self) -> bool {
        match &self.slot {
            StateSlot::Debounce(state) => !state.waiters.is_empty(),
            StateSlot::Buffer(state) => state.timer.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StateStore {
    states: DashMap<CombinatorKey, SubscriptionState>,
}

impl StateStore {
    /// Run `f` on the state for `key`, creating it on first use.
    pub fn with<T: Slot, R>(
        &self,
        key: CombinatorKey,
        stream: &str,
        now_ms: u64,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut entry = self
            .states
            .entry(key)
            .or_insert_with(|| SubscriptionState {
                stream: stream.to_string(),
                last_touched_ms: now_ms,
                slot: T::default().wrap(),
            });
        let state = entry.value_mut();
        state.last_touched_ms = now_ms;
        if T::get_mut(&mut state.slot).is_none() {
            state.slot = T::default().wrap();
        }

        let mut fallback = T::default();
        let slot = T::get_mut(&mut state.slot).unwrap_or(&mut fallback);
        f(slot)
    }

    /// Run `f` on an existing state only. Returns `None` if it is gone.
    pub fn existing<T: Slot, R>(&self, key: &CombinatorKey, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut entry = self.states.get_mut(key)?;
        T::get_mut(&mut entry.value_mut().slot).map(f)
    }

    pub fn peek<T: Slot, R>(&self, key: &CombinatorKey, f: impl FnOnce(&T) -> R) -> Option<R> {
        let entry = self.states.get(key)?;
        T::get(&entry.value().slot).map(f)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn remove_stream(&self, stream: &str) -> usize {
        self.remove_where(|state| state.stream == stream)
    }

    /// Drop states untouched for at least `threshold_ms`, unless busy.
    pub fn reap(&self, now_ms: u64, threshold_ms: u64) -> usize {
        self.remove_where(|state| {
            !state.is_busy() && now_ms.saturating_sub(state.last_touched_ms) >= threshold_ms
        })
    }

    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, predicate: impl Fn(&SubscriptionState) -> bool) -> usize {
        let keys: Vec<CombinatorKey> = self
            .states
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        keys.iter()
            .filter(|key| self.states.remove(*key).is_some())
            .count()
    }
}
