//! Combinator specs parsed from DSL-style arguments.
//!
//! Arguments arrive loosely typed. Anything missing or malformed falls back
//! to [`CombinatorDefaults`] and is reported as a [`CombinatorInputError`];
//! parsing itself never fails.

use serde::Serialize;
use serde_json::Value;

use super::Combinators;
use crate::config::CombinatorDefaults;
use crate::error::CombinatorInputError;
use crate::reactive::ChangeStrategy;

/// A combinator with its arguments resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "combinator", rename_all = "snake_case")]
pub enum CombinatorSpec {
    Debounce { delay_ms: u64 },
    Throttle { interval_ms: u64 },
    Buffer { size: usize, timeout_ms: u64 },
    Cache { ttl_ms: u64 },
    Share,
    Retry { max: u32, backoff_ms: u64 },
    Sample { interval_ms: u64 },
    AuditOn { trigger: Value },
    DistinctUntilChanged { strategy: ChangeStrategy },
    Delay { ms: u64 },
    TakeUntil { token: Value },
    SkipUntil { token: Value },
}

struct Args<'a> {
    combinator: &'static str,
    values: &'a [Value],
    errors: Vec<CombinatorInputError>,
}

impl<'a> Args<'a> {
    fn new(combinator: &'static str, values: &'a [Value]) -> Self {
        Self {
            combinator,
            values,
            errors: Vec::new(),
        }
    }

    fn reject(&mut self, argument: usize, reason: impl Into<String>) {
        self.errors.push(CombinatorInputError {
            combinator: self.combinator,
            argument,
            reason: reason.into(),
        });
    }

    /// A non-negative whole number. Numeric strings are accepted.
    fn count(&mut self, index: usize, default: u64) -> u64 {
        let values = self.values;
        let Some(raw) = values.get(index) else {
            self.reject(index, "is missing");
            return default;
        };
        let number = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match number {
            Some(n) if n.is_finite() && n >= 0.0 => n as u64,
            Some(_) => {
                self.reject(index, format!("is negative or not finite ({raw})"));
                default
            }
            None => {
                self.reject(index, format!("is not a number ({raw})"));
                default
            }
        }
    }

    fn value(&mut self, index: usize) -> Value {
        let values = self.values;
        match values.get(index) {
            Some(value) => value.clone(),
            None => {
                self.reject(index, "is missing");
                Value::Null
            }
        }
    }

    fn strategy(&mut self, index: usize) -> ChangeStrategy {
        let values = self.values;
        match values.get(index) {
            None | Some(Value::Null) => ChangeStrategy::default(),
            Some(Value::String(name)) => ChangeStrategy::from_name(name).unwrap_or_else(|| {
                self.reject(index, format!("is not a change strategy ({name:?})"));
                ChangeStrategy::default()
            }),
            Some(other) => {
                self.reject(index, format!("is not a change strategy ({other})"));
                ChangeStrategy::default()
            }
        }
    }
}

/// Normalize `camelCase`, `snake_case` and `kebab-case` names.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.trim().chars() {
        match c {
            '-' => out.push('_'),
            c if c.is_ascii_uppercase() => {
                if !out.is_empty() && !out.ends_with('_') {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

impl CombinatorSpec {
    /// Build a spec from a combinator name and its raw arguments.
    ///
    /// Returns `None` for unknown names. Arguments that had to be replaced
    /// by a default are returned alongside the spec.
    pub fn parse(
        name: &str,
        args: &[Value],
        defaults: &CombinatorDefaults,
    ) -> Option<(Self, Vec<CombinatorInputError>)> {
        let spec = match normalize(name).as_str() {
            "debounce" => {
                let mut a = Args::new("debounce", args);
                let spec = CombinatorSpec::Debounce {
                    delay_ms: a.count(0, defaults.debounce_ms),
                };
                (spec, a.errors)
            }
            "throttle" => {
                let mut a = Args::new("throttle", args);
                let spec = CombinatorSpec::Throttle {
                    interval_ms: a.count(0, defaults.throttle_ms),
                };
                (spec, a.errors)
            }
            "buffer" => {
                let mut a = Args::new("buffer", args);
                let size = match a.count(0, defaults.buffer_size as u64) {
                    0 => {
                        a.reject(0, "must be at least 1");
                        defaults.buffer_size
                    }
                    n => n as usize,
                };
                let spec = CombinatorSpec::Buffer {
                    size,
                    timeout_ms: a.count(1, defaults.buffer_timeout_ms),
                };
                (spec, a.errors)
            }
            "cache" => {
                let mut a = Args::new("cache", args);
                let spec = CombinatorSpec::Cache {
                    ttl_ms: a.count(0, defaults.cache_ttl_ms),
                };
                (spec, a.errors)
            }
            "share" => (CombinatorSpec::Share, Vec::new()),
            "retry" => {
                let mut a = Args::new("retry", args);
                let max = a.count(0, u64::from(defaults.retry_max));
                let spec = CombinatorSpec::Retry {
                    max: u32::try_from(max).unwrap_or(u32::MAX),
                    backoff_ms: a.count(1, defaults.retry_backoff_ms),
                };
                (spec, a.errors)
            }
            "sample" => {
                let mut a = Args::new("sample", args);
                let spec = CombinatorSpec::Sample {
                    interval_ms: a.count(0, defaults.sample_ms),
                };
                (spec, a.errors)
            }
            "audit_on" | "audit" => {
                let mut a = Args::new("audit_on", args);
                let spec = CombinatorSpec::AuditOn { trigger: a.value(0) };
                (spec, a.errors)
            }
            "distinct_until_changed" | "distinct" => {
                let mut a = Args::new("distinct_until_changed", args);
                let spec = CombinatorSpec::DistinctUntilChanged {
                    strategy: a.strategy(0),
                };
                (spec, a.errors)
            }
            "delay" => {
                let mut a = Args::new("delay", args);
                let spec = CombinatorSpec::Delay {
                    ms: a.count(0, defaults.delay_ms),
                };
                (spec, a.errors)
            }
            "take_until" => {
                let mut a = Args::new("take_until", args);
                let spec = CombinatorSpec::TakeUntil { token: a.value(0) };
                (spec, a.errors)
            }
            "skip_until" => {
                let mut a = Args::new("skip_until", args);
                let spec = CombinatorSpec::SkipUntil { token: a.value(0) };
                (spec, a.errors)
            }
            _ => return None,
        };
        Some(spec)
    }
}

impl Combinators {
    /// Parse a spec using these combinators' defaults, reporting every
    /// replaced argument through the log and the metrics.
    pub fn parse_spec(&self, name: &str, args: &[Value]) -> Option<CombinatorSpec> {
        let Some((spec, errors)) = CombinatorSpec::parse(name, args, &self.inner.defaults) else {
            tracing::debug!(combinator = name, "unknown combinator");
            return None;
        };
        for error in &errors {
            self.inner.metrics.record_combinator_input_error();
            tracing::warn!(
                combinator = error.combinator,
                argument = error.argument,
                reason = %error.reason,
                "combinator argument replaced by default"
            );
        }
        Some(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::tests::manual;
    use serde_json::json;

    fn parse(name: &str, args: &[Value]) -> Option<(CombinatorSpec, Vec<CombinatorInputError>)> {
        CombinatorSpec::parse(name, args, &CombinatorDefaults::default())
    }

    #[test]
    fn names_accept_camel_and_snake_case() {
        let (a, _) = parse("distinctUntilChanged", &[json!("shallow")]).unwrap();
        let (b, _) = parse("distinct_until_changed", &[json!("shallow")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            CombinatorSpec::DistinctUntilChanged {
                strategy: ChangeStrategy::Shallow
            }
        );
        assert!(parse("takeUntil", &[json!(1)]).is_some());
        assert!(parse("explode", &[]).is_none());
    }

    #[test]
    fn well_formed_arguments_are_used() {
        let (spec, errors) = parse("buffer", &[json!(5), json!("250")]).unwrap();
        assert!(errors.is_empty());
        assert_eq!(spec, CombinatorSpec::Buffer { size: 5, timeout_ms: 250 });

        let (spec, _) = parse("retry", &[json!(2), json!(50)]).unwrap();
        assert_eq!(spec, CombinatorSpec::Retry { max: 2, backoff_ms: 50 });
    }

    #[test]
    fn malformed_arguments_fall_back_to_defaults() {
        let defaults = CombinatorDefaults::default();

        let (spec, errors) = parse("debounce", &[json!(-5)]).unwrap();
        assert_eq!(spec, CombinatorSpec::Debounce { delay_ms: defaults.debounce_ms });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].combinator, "debounce");

        let (spec, errors) = parse("throttle", &[json!("soon")]).unwrap();
        assert_eq!(spec, CombinatorSpec::Throttle { interval_ms: defaults.throttle_ms });
        assert_eq!(errors.len(), 1);

        let (spec, errors) = parse("buffer", &[json!(0)]).unwrap();
        assert_eq!(
            spec,
            CombinatorSpec::Buffer {
                size: defaults.buffer_size,
                timeout_ms: defaults.buffer_timeout_ms
            }
        );
        // zero size, missing timeout
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn parse_spec_reports_to_metrics() {
        let (c, _) = manual();
        let spec = c.parse_spec("sample", &[json!(null)]).unwrap();
        assert_eq!(spec, CombinatorSpec::Sample { interval_ms: c.defaults().sample_ms });
        assert_eq!(c.metrics().snapshot().combinator_input_errors, 1);
        assert!(c.parse_spec("nope", &[]).is_none());
    }
}
