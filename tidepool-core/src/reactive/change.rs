//! Change Detection
//!
//! Equality policies that decide whether a write to a pool is different
//! enough from the previous value to be propagated to dependents.
//!
//! The write itself always lands in the pool's current value and history;
//! change detection only gates propagation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Equality policy used to gate propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStrategy {
    /// Scalars by value, containers one level deep.
    Shallow,
    /// Full structural comparison.
    #[default]
    Deep,
    /// Canonical serialization comparison.
    Custom,
    /// Every write is a change.
    Always,
}

impl ChangeStrategy {
    /// Parse a strategy name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shallow" => Some(Self::Shallow),
            "deep" => Some(Self::Deep),
            "custom" => Some(Self::Custom),
            "always" | "none" => Some(Self::Always),
            _ => None,
        }
    }

    /// Whether `a` and `b` are considered equal under this strategy.
    pub fn equals(self, a: &Value, b: &Value) -> bool {
        match self {
            ChangeStrategy::Shallow => shallow_equal(a, b),
            ChangeStrategy::Deep => deep_equal(a, b),
            ChangeStrategy::Custom => canonical_equal(a, b),
            ChangeStrategy::Always => false,
        }
    }
}

/// Whether a write from `old` to `new` should propagate.
pub fn should_update(old: &Value, new: &Value, strategy: ChangeStrategy) -> bool {
    !strategy.equals(old, new)
}

fn scalar_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        _ => a == b,
    }
}

/// Scalars compare by value. Arrays and objects compare one level deep:
/// same length, same keys, scalar-equal entries. Nested containers never
/// compare equal since values carry no identity to compare by reference.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| scalar_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| scalar_equal(l, r)))
        }
        _ => scalar_equal(a, b),
    }
}

/// Structural equality. Numbers compare numerically so `1` equals `1.0`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            // Symmetric key-set check before recursing.
            x.len() == y.len()
                && x.keys().all(|k| y.contains_key(k))
                && x.iter().all(|(k, l)| deep_equal(l, &y[k]))
        }
        _ => a == b,
    }
}

/// Equality of canonical serializations. Object keys are sorted before
/// encoding, so key order never matters.
pub fn canonical_equal(a: &Value, b: &Value) -> bool {
    let mut x = String::new();
    let mut y = String::new();
    write_canonical(a, &mut x);
    write_canonical(b, &mut y);
    x == y
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn numbers_equal(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
        return l == r;
    }
    match (x.as_f64(), y.as_f64()) {
        // NaN never reaches a Number, but keep the convention explicit.
        (Some(l), Some(r)) if l.is_nan() && r.is_nan() => true,
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_compares_one_level() {
        assert!(shallow_equal(&json!(1), &json!(1)));
        assert!(shallow_equal(&json!({"a": 1, "b": "x"}), &json!({"b": "x", "a": 1})));
        assert!(!shallow_equal(&json!({"a": 1}), &json!({"a": 2})));
        assert!(shallow_equal(&json!([1, 2]), &json!([1, 2])));

        // nested containers are never shallow-equal
        assert!(!shallow_equal(&json!({"a": {"b": 1}}), &json!({"a": {"b": 1}})));
    }

    #[test]
    fn deep_compares_structure() {
        let a = json!({"user": {"tags": ["x", "y"], "age": 3}});
        let b = json!({"user": {"age": 3, "tags": ["x", "y"]}});
        assert!(deep_equal(&a, &b));

        let c = json!({"user": {"age": 3, "tags": ["x"]}});
        assert!(!deep_equal(&a, &c));
    }

    #[test]
    fn deep_key_sets_must_match_both_ways() {
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!deep_equal(&json!({"a": 1, "b": 2}), &json!({"a": 1})));
        assert!(!deep_equal(&json!({"a": null}), &json!({"b": null})));
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!(1.5)));
        assert!(deep_equal(&json!(-4), &json!(-4)));
    }

    #[test]
    fn custom_uses_canonical_form() {
        assert!(canonical_equal(&json!({"b": 1, "a": 2}), &json!({"a": 2, "b": 1})));
        assert!(!canonical_equal(&json!(1), &json!(1.0)));
    }

    #[test]
    fn should_update_respects_strategy() {
        let v = json!({"n": 1});
        assert!(!should_update(&v, &v.clone(), ChangeStrategy::Deep));
        assert!(should_update(&v, &v.clone(), ChangeStrategy::Always));
        assert!(should_update(&v, &json!({"n": 2}), ChangeStrategy::Custom));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(ChangeStrategy::from_name("Deep"), Some(ChangeStrategy::Deep));
        assert_eq!(ChangeStrategy::from_name("shallow"), Some(ChangeStrategy::Shallow));
        assert_eq!(ChangeStrategy::from_name("bogus"), None);
    }
}
