//! Error Types
//!
//! Errors that are raised to the caller live in [`Error`]. Failures that the
//! engine isolates and only reports (lens steps, coerced combinator arguments)
//! have their own types so they can travel through the logging side-channel
//! without ever being returned as an `Err`.

use std::fmt;

use thiserror::Error;

/// What kind of named entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pool,
    Operator,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Pool => f.write_str("pool"),
            EntityKind::Operator => f.write_str("operator"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    #[error("{kind} already exists: {name}")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("derivation of '{target}' would be {depth} levels deep (max {max})")]
    DerivationTooDeep {
        target: String,
        depth: usize,
        max: usize,
    },

    #[error("deriving '{target}' from '{source_pool}' would create a cycle")]
    CycleDetected { source_pool: String, target: String },

    #[error("invalid operator name: {0:?}")]
    InvalidOperatorName(String),

    #[error("lens syntax error in {expression:?}: {reason}")]
    LensSyntax { expression: String, reason: String },

    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error("runner failed for subscriber '{token}': {reason}")]
    Runner { token: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn pool_not_found(name: &str) -> Self {
        Error::NotFound {
            kind: EntityKind::Pool,
            name: name.to_string(),
        }
    }

    pub(crate) fn operator_not_found(name: &str) -> Self {
        Error::NotFound {
            kind: EntityKind::Operator,
            name: name.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by an operator implementation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("operator '{operator}' failed: {message}")]
pub struct OperatorError {
    pub operator: String,
    pub message: String,
}

impl OperatorError {
    pub fn new(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

/// Why a single lens step was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum LensFailureKind {
    UnknownOperator,
    OperatorFailed(String),
    Syntax(String),
}

/// A lens step that failed and was skipped. Evaluation continued with the
/// value produced by the previous step.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("lens step {index} ({step}) skipped: {kind:?}")]
pub struct LensStepFailure {
    pub index: usize,
    pub step: String,
    pub kind: LensFailureKind,
}

/// A malformed combinator argument that was replaced by its default.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{combinator}: argument {argument} {reason}, using default")]
pub struct CombinatorInputError {
    pub combinator: &'static str,
    pub argument: usize,
    pub reason: String,
}
