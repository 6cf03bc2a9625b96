//! Value-gated combinators: audit, distinct and take/skip until a token.

use serde_json::Value;

use super::key::{CombinatorKey, CombinatorKind};
use super::state::{GateState, LastValueState};
use super::{Combinators, Emission};
use crate::reactive::change::deep_equal;
use crate::reactive::ChangeStrategy;

impl Combinators {
    /// Hold non-trigger pushes. A push equal to `trigger` emits the last held
    /// value, if any. The held value stays until a newer push replaces it.
    pub fn audit_on(&self, stream: &str, trigger: &Value, value: Value) -> Option<Value> {
        let key = CombinatorKey::new(CombinatorKind::AuditOn, stream, std::slice::from_ref(trigger));
        self.inner
            .states
            .with::<LastValueState, _>(key, stream, self.now(), |state| {
                if deep_equal(&value, trigger) {
                    state.last.clone()
                } else {
                    state.last = Some(value);
                    None
                }
            })
    }

    /// Emit a push only if it differs from the last emitted one.
    pub fn distinct_until_changed(&self, stream: &str, strategy: ChangeStrategy, value: Value) -> Option<Value> {
        let key = CombinatorKey::new(
            CombinatorKind::DistinctUntilChanged,
            stream,
            &[serde_json::to_value(strategy).unwrap_or(Value::Null)],
        );
        self.inner
            .states
            .with::<LastValueState, _>(key, stream, self.now(), |state| {
                if state
                    .last
                    .as_ref()
                    .is_some_and(|last| strategy.equals(last, &value))
                {
                    return None;
                }
                state.last = Some(value.clone());
                Some(value)
            })
    }

    /// Pass pushes through until one equals `token`. From then on the
    /// stream is completed.
    pub fn take_until(&self, stream: &str, token: &Value, value: Value) -> Emission {
        let key = CombinatorKey::new(CombinatorKind::TakeUntil, stream, std::slice::from_ref(token));
        self.inner
            .states
            .with::<GateState, _>(key, stream, self.now(), |state| {
                if state.triggered || deep_equal(&value, token) {
                    state.triggered = true;
                    Emission::Completed
                } else {
                    Emission::Value(value)
                }
            })
    }

    /// Drop pushes until one equals `token`, then pass every later push
    /// through. The token push itself is dropped.
    pub fn skip_until(&self, stream: &str, token: &Value, value: Value) -> Option<Value> {
        let key = CombinatorKey::new(CombinatorKind::SkipUntil, stream, std::slice::from_ref(token));
        self.inner
            .states
            .with::<GateState, _>(key, stream, self.now(), |state| {
                if state.triggered {
                    Some(value)
                } else {
                    state.triggered = deep_equal(&value, token);
                    None
                }
            })
    }
}
