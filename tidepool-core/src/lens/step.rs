//! Lens Step Representation
//!
//! A lens is an ordered list of steps. Steps are plain data: they can be
//! serialized, inspected and rendered back to expression text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::operator::OperatorLookup;
use super::parser;
use crate::error::{Error, Result};

/// Literal arguments of an operator call. Most calls take few arguments.
pub type LensArgs = SmallVec<[Value; 4]>;

/// A single step of a lens expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LensStep {
    /// `.name`: undefined-safe property access
    FieldAccess { name: String },
    /// `name(arg, ...)`: operator call with literal arguments
    OperatorCall { name: String, args: LensArgs },
    /// `name`: operator call without arguments
    BareOperator { name: String },
    /// `.value`: unwrap a `{value: ...}` wrapper
    ValueProjection,
}

impl LensStep {
    pub fn field(name: impl Into<String>) -> Self {
        LensStep::FieldAccess { name: name.into() }
    }

    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        LensStep::OperatorCall {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        LensStep::BareOperator { name: name.into() }
    }

    /// The operator this step resolves, if any.
    pub fn operator_name(&self) -> Option<&str> {
        match self {
            LensStep::OperatorCall { name, .. } | LensStep::BareOperator { name } => Some(name),
            LensStep::FieldAccess { .. } | LensStep::ValueProjection => None,
        }
    }

    /// Arguments passed to the operator (empty for non-operator steps).
    pub fn args(&self) -> &[Value] {
        match self {
            LensStep::OperatorCall { args, .. } => args,
            _ => &[],
        }
    }
}

impl fmt::Display for LensStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensStep::FieldAccess { name } => write!(f, ".{name}"),
            LensStep::BareOperator { name } => f.write_str(name),
            LensStep::ValueProjection => f.write_str(".value"),
            LensStep::OperatorCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A parsed lens expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lens {
    steps: Vec<LensStep>,
}

impl Lens {
    pub fn new(steps: Vec<LensStep>) -> Self {
        Self { steps }
    }

    /// The identity lens.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Parse an expression, rejecting malformed steps.
    pub fn parse(expression: &str) -> Result<Self> {
        let mut steps = Vec::new();
        if expression.trim().is_empty() {
            return Ok(Self { steps });
        }
        for raw in parser::split_top_level(expression, '|') {
            let parsed = parser::parse_step(raw).map_err(|reason| Error::LensSyntax {
                expression: expression.to_string(),
                reason,
            })?;
            steps.extend(parsed);
        }
        Ok(Self { steps })
    }

    /// Parse an expression and check that every operator it names resolves.
    pub fn compile(expression: &str, operators: &dyn OperatorLookup) -> Result<Self> {
        let lens = Self::parse(expression)?;
        lens.validate(operators)?;
        Ok(lens)
    }

    /// Check that every operator named by this lens resolves.
    pub fn validate(&self, operators: &dyn OperatorLookup) -> Result<()> {
        for name in self.operator_names() {
            if operators.lookup_operator(name).is_none() {
                return Err(Error::operator_not_found(name));
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[LensStep] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn operator_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(LensStep::operator_name)
    }

    /// Append a step, returning the extended lens.
    pub fn then(mut self, step: LensStep) -> Self {
        self.steps.push(step);
        self
    }
}

impl FromStr for Lens {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}
