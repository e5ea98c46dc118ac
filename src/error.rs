//! Error taxonomy for the archetype interpreter (spec.md §7).
//!
//! Every variant keeps enough context to render the stable textual form
//! `"{path}:{line}:{col} {message}: {detail}"` required by §6. Callers that
//! need to special-case a particular failure (the validator downgrading
//! `UnresolvedVariable` to a diagnostic, the permutation engine discarding
//! `InvalidOption`) match on the enum rather than string-sniffing.

use std::fmt;

use crate::value::ValueType;

/// A source location, `path:line:col`, attached to most error kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub path: String,
    pub line: u32,
    pub col: u32,
}

impl Location {
    #[must_use]
    pub fn new(path: impl Into<String>, line: u32, col: u32) -> Self {
        Self { path: path.into(), line, col }
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.col)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchetypeError {
    #[error("{0} format error: {1}")]
    FormatError(Location, String),

    #[error("{loc} value type error: cannot coerce {from:?} to {to:?}")]
    ValueTypeError { loc: Location, from: ValueType, to: ValueType },

    #[error("{0} unresolved variable: {1}")]
    UnresolvedVariable(Location, String),

    #[error("{0} unresolved input: {1}")]
    UnresolvedInput(Location, String),

    #[error("{loc} invalid option for {path}: {value}")]
    InvalidOption { loc: Location, path: String, value: String },

    #[error("{0} invocation error: {1}")]
    InvocationError(Location, Box<ArchetypeError>),

    #[error("{0} cycle detected invoking {1}")]
    CycleDetected(Location, String),

    #[error("{0} eval error: {1}")]
    EvalError(Location, String),

    #[error("{0} io error: {1}")]
    Io(Location, String),
}

impl ArchetypeError {
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            ArchetypeError::FormatError(l, _)
            | ArchetypeError::UnresolvedVariable(l, _)
            | ArchetypeError::UnresolvedInput(l, _)
            | ArchetypeError::InvocationError(l, _)
            | ArchetypeError::CycleDetected(l, _)
            | ArchetypeError::EvalError(l, _)
            | ArchetypeError::Io(l, _) => l,
            ArchetypeError::ValueTypeError { loc, .. } | ArchetypeError::InvalidOption { loc, .. } => loc,
        }
    }

    /// True for `UnresolvedVariable`, the one kind the validator catches and
    /// converts into a diagnostic instead of propagating (spec.md §7).
    #[must_use]
    pub fn is_unresolved_variable(&self) -> bool {
        matches!(self, ArchetypeError::UnresolvedVariable(..))
    }

    /// True for `InvalidOption`, the one kind the permutation engine treats
    /// as non-fatal (it drops the permutation instead of aborting).
    #[must_use]
    pub fn is_invalid_option(&self) -> bool {
        matches!(self, ArchetypeError::InvalidOption { .. })
    }
}

pub type Result<T> = std::result::Result<T, ArchetypeError>;
