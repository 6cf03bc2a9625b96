//! Lens Evaluation
//!
//! Interprets a [`Lens`] against a value, strictly left to right.
//!
//! Evaluation is fail-soft: a step that names an unknown operator, or whose
//! operator returns an error, is skipped. The value produced by the previous
//! step carries on to the next one, and the skipped step is reported as a
//! [`LensStepFailure`] through `tracing` and the engine metrics.

use std::sync::Arc;

use serde_json::Value;

use super::operator::{LensContext, OperatorLookup};
use super::parser;
use super::step::{Lens, LensStep};
use crate::error::{LensFailureKind, LensStepFailure};
use crate::metrics::EngineMetrics;

/// Result of a detailed evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LensOutput {
    pub value: Value,
    pub failures: Vec<LensStepFailure>,
}

impl LensOutput {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Evaluates lenses against an operator lookup.
#[derive(Clone)]
pub struct LensEvaluator {
    operators: Arc<dyn OperatorLookup>,
    metrics: Arc<EngineMetrics>,
}

impl LensEvaluator {
    pub fn new(operators: Arc<dyn OperatorLookup>) -> Self {
        Self {
            operators,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Share a metrics sink with the rest of the engine.
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn operators(&self) -> &Arc<dyn OperatorLookup> {
        &self.operators
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Evaluate a parsed lens. Never fails.
    pub fn evaluate(&self, input: &Value, lens: &Lens, ctx: &LensContext) -> Value {
        self.evaluate_detailed(input, lens, ctx).value
    }

    /// Evaluate a parsed lens, also returning the skipped steps.
    pub fn evaluate_detailed(&self, input: &Value, lens: &Lens, ctx: &LensContext) -> LensOutput {
        let mut failures = Vec::new();
        let value = self.run_steps(input, lens.steps(), ctx, &mut failures);
        self.report(&failures);
        LensOutput { value, failures }
    }

    /// Parse and evaluate an expression. Malformed steps become skipped
    /// steps instead of an error.
    pub fn evaluate_str(&self, input: &Value, expression: &str, ctx: &LensContext) -> Value {
        self.evaluate_str_detailed(input, expression, ctx).value
    }

    pub fn evaluate_str_detailed(
        &self,
        input: &Value,
        expression: &str,
        ctx: &LensContext,
    ) -> LensOutput {
        let (steps, rejected) = parser::parse_lenient(expression);
        let mut failures: Vec<LensStepFailure> = rejected
            .into_iter()
            .map(|(index, step, reason)| LensStepFailure {
                index,
                step,
                kind: LensFailureKind::Syntax(reason),
            })
            .collect();
        let value = self.run_steps(input, &steps, ctx, &mut failures);
        self.report(&failures);
        LensOutput { value, failures }
    }

    fn run_steps(
        &self,
        input: &Value,
        steps: &[LensStep],
        ctx: &LensContext,
        failures: &mut Vec<LensStepFailure>,
    ) -> Value {
        let mut current = input.clone();
        for (index, step) in steps.iter().enumerate() {
            match self.apply_step(&current, step, ctx) {
                Ok(next) => current = next,
                Err(kind) => failures.push(LensStepFailure {
                    index,
                    step: step.to_string(),
                    kind,
                }),
            }
        }
        current
    }

    fn apply_step(
        &self,
        current: &Value,
        step: &LensStep,
        ctx: &LensContext,
    ) -> Result<Value, LensFailureKind> {
        match step {
            LensStep::ValueProjection => Ok(match current {
                Value::Object(map) => map.get("value").cloned().unwrap_or_else(|| current.clone()),
                _ => current.clone(),
            }),
            LensStep::FieldAccess { name } => Ok(field(current, name)),
            LensStep::OperatorCall { name, .. } | LensStep::BareOperator { name } => {
                let operator = self
                    .operators
                    .lookup_operator(name)
                    .ok_or(LensFailureKind::UnknownOperator)?;
                operator
                    .call(current, step.args(), ctx)
                    .map_err(|e| LensFailureKind::OperatorFailed(e.message))
            }
        }
    }

    fn report(&self, failures: &[LensStepFailure]) {
        if failures.is_empty() {
            return;
        }
        for failure in failures {
            tracing::warn!(
                index = failure.index,
                step = %failure.step,
                kind = ?failure.kind,
                "lens step skipped"
            );
        }
        self.metrics.record_lens_step_failures(failures.len());
    }
}

impl std::fmt::Debug for LensEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LensEvaluator").finish_non_exhaustive()
    }
}

/// Undefined-safe property access. Arrays accept numeric indices; anything
/// missing yields `null`.
pub(crate) fn field(value: &Value, name: &str) -> Value {
    match value {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::OperatorRegistry;
    use serde_json::json;

    fn evaluator() -> LensEvaluator {
        let registry = OperatorRegistry::new();
        registry
            .register("double", |v, _, _| Ok(json!(v.as_f64().unwrap_or(0.0) * 2.0)))
            .unwrap();
        registry
            .register("explode", |_, _, _| {
                Err(crate::error::OperatorError::new("explode", "boom"))
            })
            .unwrap();
        registry
            .register("get", |v, args, _| {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(field(v, key))
            })
            .unwrap();
        LensEvaluator::new(Arc::new(registry))
    }

    #[test]
    fn field_access_is_undefined_safe() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!({"a": {"b": [10, 20]}});

        assert_eq!(ev.evaluate_str(&input, ".a.b.1", &ctx), json!(20));
        assert_eq!(ev.evaluate_str(&input, ".a.missing.deeper", &ctx), Value::Null);
        assert_eq!(ev.evaluate_str(&json!(5), ".x", &ctx), Value::Null);
    }

    #[test]
    fn value_projection_unwraps_wrappers_only() {
        let ev = evaluator();
        let ctx = LensContext::default();
        assert_eq!(ev.evaluate_str(&json!({"value": 3}), ".value", &ctx), json!(3));
        assert_eq!(ev.evaluate_str(&json!({"v": 3}), ".value", &ctx), json!({"v": 3}));
        assert_eq!(ev.evaluate_str(&json!(7), ".value", &ctx), json!(7));
    }

    #[test]
    fn operators_chain_left_to_right() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let out = ev.evaluate_str(&json!({"n": 2}), "get('n') | double | double", &ctx);
        assert_eq!(out, json!(8.0));
    }

    #[test]
    fn clean_evaluation_reports_no_failures() {
        let ev = evaluator();
        let out = ev.evaluate_str_detailed(&json!({"n": 3}), ".n | double", &LensContext::default());
        assert!(out.is_clean());
        assert_eq!(out.value, json!(6.0));
    }

    #[test]
    fn unknown_operator_is_skipped() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!({"field": "kept"});

        let out = ev.evaluate_str_detailed(&input, "unknownOp | .field", &ctx);
        assert_eq!(out.value, json!("kept"));
        assert!(!out.is_clean());
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].kind, LensFailureKind::UnknownOperator);
        assert_eq!(ev.metrics().snapshot().lens_step_failures, 1);
    }

    #[test]
    fn failing_operator_keeps_prior_value() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let out = ev.evaluate_str_detailed(&json!(4), "double | explode | double", &ctx);
        assert_eq!(out.value, json!(16.0));
        assert_eq!(
            out.failures[0].kind,
            LensFailureKind::OperatorFailed("boom".into())
        );
    }

    #[test]
    fn syntax_errors_are_fail_soft_at_runtime() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let out = ev.evaluate_str_detailed(&json!({"a": 1}), "f(( | .a", &ctx);
        // the unclosed call swallows the rest of the expression
        assert_eq!(out.value, json!({"a": 1}));
        assert!(matches!(out.failures[0].kind, LensFailureKind::Syntax(_)));
    }

    #[test]
    fn parsed_lens_matches_string_evaluation() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let lens = Lens::parse(".n | double").unwrap();
        let input = json!({"n": 1.5});
        assert_eq!(ev.evaluate(&input, &lens, &ctx), ev.evaluate_str(&input, ".n | double", &ctx));
    }
}
