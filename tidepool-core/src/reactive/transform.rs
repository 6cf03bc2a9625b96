//! Derivation transforms.
//!
//! A derived pool is recomputed from its source through a [`Transform`].
//! Transforms are data rather than closures, so a derivation can be
//! serialized, logged and inspected after the fact.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::lens::{ops, Lens, LensArgs, LensContext, LensEvaluator, OperatorLookup};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    /// Read a dotted path out of the source value. Missing paths yield `null`.
    FieldAccess { path: String },

    /// Call a single operator with literal arguments.
    OperatorCall {
        name: String,
        #[serde(default)]
        args: LensArgs,
    },

    /// Ignore the source and always produce this value.
    Literal { value: Value },

    /// Run a lens over the source value.
    Lens { lens: Lens },
}

impl Transform {
    pub fn field(path: impl Into<String>) -> Self {
        Transform::FieldAccess { path: path.into() }
    }

    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Transform::OperatorCall {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn literal(value: Value) -> Self {
        Transform::Literal { value }
    }

    /// Parse a lens expression into a transform.
    pub fn lens(expression: &str) -> Result<Self> {
        Ok(Transform::Lens {
            lens: Lens::parse(expression)?,
        })
    }

    /// Check that every operator this transform names can be resolved.
    pub fn validate(&self, operators: &dyn OperatorLookup) -> Result<()> {
        match self {
            Transform::OperatorCall { name, .. } => operators
                .lookup_operator(name)
                .map(|_| ())
                .ok_or_else(|| Error::operator_not_found(name)),
            Transform::Lens { lens } => lens.validate(operators),
            Transform::FieldAccess { .. } | Transform::Literal { .. } => Ok(()),
        }
    }

    /// Compute the derived value.
    ///
    /// Lens transforms are fail-soft and never return an error. An operator
    /// call fails if the operator is missing or returns an error.
    pub fn apply(&self, input: &Value, evaluator: &LensEvaluator, ctx: &LensContext) -> Result<Value> {
        match self {
            Transform::FieldAccess { path } => Ok(ops::get_path(input, path)),
            Transform::OperatorCall { name, args } => {
                let operator = evaluator
                    .operators()
                    .lookup_operator(name)
                    .ok_or_else(|| Error::operator_not_found(name))?;
                Ok(operator.call(input, args, ctx)?)
            }
            Transform::Literal { value } => Ok(value.clone()),
            Transform::Lens { lens } => Ok(evaluator.evaluate(input, lens, ctx)),
        }
    }
}

impl From<Lens> for Transform {
    fn from(lens: Lens) -> Self {
        Transform::Lens { lens }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::FieldAccess { path } => write!(f, ".{path}"),
            Transform::OperatorCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Transform::Literal { value } => write!(f, "{value}"),
            Transform::Lens { lens } => write!(f, "{lens}"),
        }
    }
}
