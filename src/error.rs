//! Error types for episodic.
//!
//! All errors are strongly typed using thiserror. The families follow the
//! failure domains of a derivation run:
//! - configuration problems found while loading a knowledge base,
//! - matching problems that disable a single abstraction definition,
//! - arithmetic on inconsistent temporal bounds,
//! - storage and execution failures while processing subjects.

use thiserror::Error;

use crate::proposition::KindId;
use crate::storage::StorageError;
use crate::weight::Weight;

/// Knowledge-base configuration errors. Fatal: processing does not start.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Cyclic abstraction dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        cycle: Vec<KindId>,
    },

    #[error("Abstraction '{abstraction}' has an inconsistent relation network and can never match")]
    InconsistentRelations {
        abstraction: KindId,
    },

    #[error("Definition '{id}' referenced by '{referenced_by}' does not exist")]
    MissingDefinition {
        id: KindId,
        referenced_by: KindId,
    },

    #[error("Definition '{id}' is declared more than once")]
    DuplicateDefinition {
        id: KindId,
    },

    #[error("Abstraction '{abstraction}' has no role named '{role}'")]
    UnknownRole {
        abstraction: KindId,
        role: String,
    },

    #[error("Abstraction '{abstraction}' declares role '{role}' more than once")]
    DuplicateRole {
        abstraction: KindId,
        role: String,
    },

    #[error("Abstraction '{abstraction}' declares more than one relation for ({lhs}, {rhs})")]
    DuplicateRelation {
        abstraction: KindId,
        lhs: String,
        rhs: String,
    },

    #[error("Abstraction '{abstraction}' is not abstracted from anything")]
    EmptyAbstraction {
        abstraction: KindId,
    },

    #[error("Invalid identifier '{id}'")]
    InvalidIdentifier {
        id: String,
    },

    #[error("Invalid interval: {reason}")]
    InvalidInterval {
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

fn format_cycle(cycle: &[KindId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors in Weight arithmetic. Always raised, never coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("Undefined arithmetic on opposite infinities: {lhs} and {rhs}")]
    OppositeInfinities {
        lhs: Weight,
        rhs: Weight,
    },
}

/// Errors that disable one abstraction definition while others continue.
#[derive(Debug, Clone, Error)]
pub enum MatchingError {
    #[error("Abstraction '{abstraction}' has a malformed {field} bound: min {min} exceeds max {max}")]
    MalformedBound {
        abstraction: KindId,
        field: String,
        min: Weight,
        max: Weight,
    },

    #[error("Abstraction '{abstraction}' depends on rejected definition '{dependency}'")]
    RejectedDependency {
        abstraction: KindId,
        dependency: KindId,
    },

    #[error("Arithmetic error while matching '{abstraction}': {source}")]
    Arithmetic {
        abstraction: KindId,
        #[source]
        source: ArithmeticError,
    },
}

impl MatchingError {
    /// Returns the abstraction definition this error disables.
    #[must_use]
    pub fn abstraction(&self) -> &KindId {
        match self {
            Self::MalformedBound { abstraction, .. }
            | Self::RejectedDependency { abstraction, .. }
            | Self::Arithmetic { abstraction, .. } => abstraction,
        }
    }
}

/// Execution errors raised while processing subjects.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Processing of subject '{key}' was cancelled")]
    Cancelled {
        key: String,
    },

    #[error("Subject '{key}' exceeded the firing limit of {limit} activations")]
    FixedPointLimitExceeded {
        key: String,
        limit: usize,
    },

    #[error("Subject '{key}' failed: {reason}")]
    SubjectFailed {
        key: String,
        reason: String,
    },

    #[error("Worker queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Worker pool disconnected")]
    Disconnected,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for episodic.
#[derive(Debug, Error)]
pub enum EpisodicError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EpisodicError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a knowledge-base validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Cancelled { .. }))
    }

    /// Returns true if the failure is confined to the subject being processed,
    /// so other subjects may proceed.
    #[must_use]
    pub const fn is_subject_local(&self) -> bool {
        match self {
            Self::Matching(_) | Self::Arithmetic(_) => true,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::FixedPointLimitExceeded { .. } | ExecutionError::SubjectFailed { .. }
            ),
            Self::Validation(_) | Self::Storage(_) | Self::Internal { .. } => false,
        }
    }

    /// Returns true if the failure involves shared state and must abort the run.
    #[must_use]
    pub const fn aborts_run(&self) -> bool {
        !self.is_subject_local() && !self.is_cancelled()
    }
}

/// Result type alias for episodic operations.
pub type EpisodicResult<T> = Result<T, EpisodicError>;
