//! Lens consumers: map, filter, reduce, conditional selection and path
//! transforms built on top of [`LensEvaluator`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use super::evaluator::LensEvaluator;
use super::operator::LensContext;
use super::parser::parse_literal;
use super::step::Lens;
use crate::error::{Error, Result};
use crate::reactive::change::deep_equal;

/// Truthiness: `null`, `false`, `0` and `""` are false, everything else true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Apply `lens` to each item. A non-array input is transformed as a single
/// value.
pub fn map_lens(ev: &LensEvaluator, input: &Value, lens: &Lens, ctx: &LensContext) -> Value {
    match input {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| ev.evaluate(item, lens, ctx))
                .collect(),
        ),
        other => ev.evaluate(other, lens, ctx),
    }
}

/// Keep the items whose lens result is truthy. Always returns an array.
pub fn filter_lens(ev: &LensEvaluator, input: &Value, lens: &Lens, ctx: &LensContext) -> Value {
    Value::Array(
        items(input)
            .into_iter()
            .filter(|item| truthy(&ev.evaluate(item, lens, ctx)))
            .cloned()
            .collect(),
    )
}

/// Fold over the input. The lens sees `{acc, item, index}` and its result
/// becomes the next accumulator.
pub fn reduce_lens(
    ev: &LensEvaluator,
    input: &Value,
    lens: &Lens,
    initial: Value,
    ctx: &LensContext,
) -> Value {
    items(input)
        .into_iter()
        .enumerate()
        .fold(initial, |acc, (index, item)| {
            let mut frame = Map::new();
            frame.insert("acc".into(), acc);
            frame.insert("item".into(), item.clone());
            frame.insert("index".into(), Value::from(index));
            ev.evaluate(&Value::Object(frame), lens, ctx)
        })
}

/// Binary comparator used by [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Comparator {
    fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
        }
    }

    pub fn compare(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            Comparator::Eq => deep_equal(lhs, rhs),
            Comparator::Ne => !deep_equal(lhs, rhs),
            Comparator::Gt => order(lhs, rhs) == Some(Ordering::Greater),
            Comparator::Lt => order(lhs, rhs) == Some(Ordering::Less),
        }
    }
}

/// Numbers order numerically, strings lexically, anything else is unordered.
fn order(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Lens(Lens),
    Literal(Value),
}

/// `lhs OP rhs`, or a bare lens tested for truthiness.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    lhs: Lens,
    comparison: Option<(Comparator, Operand)>,
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self> {
        match find_comparator(expression) {
            None => Ok(Self {
                lhs: Lens::parse(expression)?,
                comparison: None,
            }),
            Some((at, comparator)) => {
                let lhs = Lens::parse(&expression[..at])?;
                let rhs = expression[at + comparator.symbol().len()..].trim();
                if rhs.is_empty() {
                    return Err(Error::LensSyntax {
                        expression: expression.to_string(),
                        reason: format!("missing right operand for {}", comparator.symbol()),
                    });
                }
                let rhs = if rhs.starts_with('.') {
                    Operand::Lens(Lens::parse(rhs)?)
                } else {
                    Operand::Literal(parse_literal(rhs))
                };
                Ok(Self {
                    lhs,
                    comparison: Some((comparator, rhs)),
                })
            }
        }
    }

    pub fn evaluate(&self, ev: &LensEvaluator, input: &Value, ctx: &LensContext) -> bool {
        let lhs = ev.evaluate(input, &self.lhs, ctx);
        match &self.comparison {
            None => truthy(&lhs),
            Some((comparator, operand)) => {
                let rhs = match operand {
                    Operand::Lens(lens) => ev.evaluate(input, lens, ctx),
                    Operand::Literal(value) => value.clone(),
                };
                comparator.compare(&lhs, &rhs)
            }
        }
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lhs)?;
        if let Some((comparator, operand)) = &self.comparison {
            write!(f, " {} ", comparator.symbol())?;
            match operand {
                Operand::Lens(lens) => write!(f, "{lens}")?,
                Operand::Literal(value) => write!(f, "{value}")?,
            }
        }
        Ok(())
    }
}

/// Locate the first comparator outside quotes and parentheses.
fn find_comparator(expression: &str) -> Option<(usize, Comparator)> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let bytes = expression.as_bytes();
    for (i, c) in expression.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        let next = bytes.get(i + 1).copied();
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '=' if depth == 0 && next == Some(b'=') => return Some((i, Comparator::Eq)),
            '!' if depth == 0 && next == Some(b'=') => return Some((i, Comparator::Ne)),
            '>' if depth == 0 => return Some((i, Comparator::Gt)),
            '<' if depth == 0 => return Some((i, Comparator::Lt)),
            _ => {}
        }
    }
    None
}

/// Evaluate `condition` and apply the selected branch. A missing branch
/// passes the input through.
pub fn conditional_lens(
    ev: &LensEvaluator,
    input: &Value,
    condition: &Condition,
    then_lens: Option<&Lens>,
    else_lens: Option<&Lens>,
    ctx: &LensContext,
) -> Value {
    let branch = if condition.evaluate(ev, input, ctx) {
        then_lens
    } else {
        else_lens
    };
    match branch {
        Some(lens) => ev.evaluate(input, lens, ctx),
        None => input.clone(),
    }
}

/// Apply each `(target_path, lens)` pair to the original input and write the
/// result into a shallow clone at the dotted path, creating intermediate
/// objects as needed. Non-object inputs start from an empty object.
pub fn transform_paths(
    ev: &LensEvaluator,
    input: &Value,
    mappings: &[(String, Lens)],
    ctx: &LensContext,
) -> Value {
    let mut output = match input {
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };
    for (path, lens) in mappings {
        let computed = ev.evaluate(input, lens, ctx);
        set_path(&mut output, path, computed);
    }
    output
}

/// Read a dotted path, yielding `null` for anything missing.
pub fn get_path(value: &Value, path: &str) -> Value {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .fold(value.clone(), |current, segment| {
            super::evaluator::field(&current, segment)
        })
}

/// Write `new` at a dotted path. Non-object intermediates are replaced by
/// objects.
pub fn set_path(target: &mut Value, path: &str, new: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *target = new;
        return;
    };

    let mut cursor = target;
    for segment in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        cursor = match cursor {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Value::Object(map) = cursor {
        map.insert(last.to_string(), new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::OperatorRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn evaluator() -> LensEvaluator {
        let registry = OperatorRegistry::new();
        registry
            .register("add", |v, _, _| {
                let acc = v["acc"].as_f64().unwrap_or(0.0);
                let item = v["item"].as_f64().unwrap_or(0.0);
                Ok(json!(acc + item))
            })
            .unwrap();
        registry
            .register("upper", |v, _, _| {
                Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
            })
            .unwrap();
        LensEvaluator::new(Arc::new(registry))
    }

    fn lens(expr: &str) -> Lens {
        Lens::parse(expr).unwrap()
    }

    #[test]
    fn map_transforms_each_item() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!([{"name": "a"}, {"name": "b"}]);
        assert_eq!(
            map_lens(&ev, &input, &lens(".name | upper"), &ctx),
            json!(["A", "B"])
        );
        assert_eq!(map_lens(&ev, &json!({"name": "c"}), &lens(".name"), &ctx), json!("c"));
    }

    #[test]
    fn filter_keeps_truthy_items() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!([{"on": true}, {"on": false}, {"on": 1}, {}]);
        assert_eq!(
            filter_lens(&ev, &input, &lens(".on"), &ctx),
            json!([{"on": true}, {"on": 1}])
        );
        assert_eq!(filter_lens(&ev, &json!({"on": 0}), &lens(".on"), &ctx), json!([]));
    }

    #[test]
    fn reduce_folds_with_frame() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let sum = reduce_lens(&ev, &json!([1, 2, 3, 4]), &lens("add"), json!(0), &ctx);
        assert_eq!(sum, json!(10.0));

        let last_index = reduce_lens(&ev, &json!(["x", "y"]), &lens(".index"), json!(null), &ctx);
        assert_eq!(last_index, json!(1));
    }

    #[test]
    fn conditional_selects_branch() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let cond = Condition::parse(".temp > 30").unwrap();
        let hot = lens(".label | upper");
        let input = json!({"temp": 35, "label": "hot"});

        assert_eq!(
            conditional_lens(&ev, &input, &cond, Some(&hot), None, &ctx),
            json!("HOT")
        );
        let cool = json!({"temp": 10, "label": "cool"});
        assert_eq!(conditional_lens(&ev, &cool, &cond, Some(&hot), None, &ctx), cool);
    }

    #[test]
    fn comparators() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!({"a": 2, "b": 2.0, "s": "x", "t": "y"});

        assert!(Condition::parse(".a == .b").unwrap().evaluate(&ev, &input, &ctx));
        assert!(!Condition::parse(".a != 2").unwrap().evaluate(&ev, &input, &ctx));
        assert!(Condition::parse(".s < .t").unwrap().evaluate(&ev, &input, &ctx));
        assert!(Condition::parse(".s == 'x'").unwrap().evaluate(&ev, &input, &ctx));
        // mixed types are unordered
        assert!(!Condition::parse(".a > 'x'").unwrap().evaluate(&ev, &input, &ctx));
        assert!(!Condition::parse(".a < 'x'").unwrap().evaluate(&ev, &input, &ctx));
        // truthiness without a comparator
        assert!(Condition::parse(".s").unwrap().evaluate(&ev, &input, &ctx));
        assert!(!Condition::parse(".missing").unwrap().evaluate(&ev, &input, &ctx));
    }

    #[test]
    fn condition_requires_rhs() {
        assert!(Condition::parse(".a ==").is_err());
    }

    #[test]
    fn transform_paths_builds_intermediates() {
        let ev = evaluator();
        let ctx = LensContext::default();
        let input = json!({"name": "ada", "meta": 5});
        let out = transform_paths(
            &ev,
            &input,
            &[
                ("profile.display".to_string(), lens(".name | upper")),
                ("meta.source".to_string(), lens(".name")),
            ],
            &ctx,
        );
        assert_eq!(
            out,
            json!({
                "name": "ada",
                "meta": {"source": "ada"},
                "profile": {"display": "ADA"}
            })
        );
        // input is untouched
        assert_eq!(input, json!({"name": "ada", "meta": 5}));
    }

    #[test]
    fn paths_read_and_write() {
        let mut v = json!(null);
        set_path(&mut v, "a.b", json!(1));
        assert_eq!(v, json!({"a": {"b": 1}}));
        assert_eq!(get_path(&v, "a.b"), json!(1));
        assert_eq!(get_path(&v, "a.c.d"), Value::Null);
    }
}
