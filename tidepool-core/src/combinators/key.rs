//! Subscription state keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

/// Which combinator a piece of state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinatorKind {
    Debounce,
    Throttle,
    Buffer,
    Cache,
    Share,
    Retry,
    Sample,
    AuditOn,
    DistinctUntilChanged,
    TakeUntil,
    SkipUntil,
}

impl CombinatorKind {
    pub fn name(self) -> &'static str {
        match self {
            CombinatorKind::Debounce => "debounce",
            CombinatorKind::Throttle => "throttle",
            CombinatorKind::Buffer => "buffer",
            CombinatorKind::Cache => "cache",
            CombinatorKind::Share => "share",
            CombinatorKind::Retry => "retry",
            CombinatorKind::Sample => "sample",
            CombinatorKind::AuditOn => "audit_on",
            CombinatorKind::DistinctUntilChanged => "distinct_until_changed",
            CombinatorKind::TakeUntil => "take_until",
            CombinatorKind::SkipUntil => "skip_until",
        }
    }
}

impl fmt::Display for CombinatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one combinator instance: its kind plus a hash of the stream
/// label and its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CombinatorKey {
    pub kind: CombinatorKind,
    pub args_hash: u64,
}

impl CombinatorKey {
    pub fn new(kind: CombinatorKind, stream: &str, args: &[Value]) -> Self {
        let mut hasher = DefaultHasher::new();
        stream.hash(&mut hasher);
        for arg in args {
            // JSON text is a stable stand-in since `Value` has no `Hash`
            arg.to_string().hash(&mut hasher);
        }
        Self {
            kind,
            args_hash: hasher.finish(),
        }
    }
}
