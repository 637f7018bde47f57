//! Engine error taxonomy
//!
//! One enum per concern; [`ReflexError`] aggregates them for callers that
//! only want to propagate.

use thiserror::Error;

use crate::ast::{EditError, TypeIdentity};
use crate::compiler::Diagnostic;
use crate::evaluator::EvaluatorError;
use crate::host::HostFacilityError;
use crate::ledger::LedgerError;
use crate::parser::ParseError;
use crate::pipeline::PipelineError;
use crate::storage::{InheritanceCycleError, StorageError};

/// A mutation was refused before any state changed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Member '{member}' already exists on {identity}")]
    DuplicateMember {
        identity: TypeIdentity,
        member: String,
    },

    #[error("Member '{member}' not found on {identity}")]
    UnknownMember {
        identity: TypeIdentity,
        member: String,
    },

    #[error("Selector '{selector}' on {identity} matches {candidates:?}")]
    AmbiguousMember {
        identity: TypeIdentity,
        selector: String,
        candidates: Vec<String>,
    },

    #[error("Member '{member}' of {identity} is not a method")]
    NotAMethod {
        identity: TypeIdentity,
        member: String,
    },

    #[error("Method '{member}' of {identity} takes {expected} parameter(s), got {actual} name(s)")]
    ParameterCount {
        identity: TypeIdentity,
        member: String,
        expected: usize,
        actual: usize,
    },

    #[error("Annotation @{annotation} cannot be attached to {target}")]
    InvalidAnnotationTarget { annotation: String, target: String },

    #[error("Invalid import '{import}'")]
    InvalidImport { import: String },

    #[error("Invalid identifier '{identifier}'")]
    InvalidIdentifier { identifier: String },

    #[error("Invalid modifiers on '{member}': {reason}")]
    InvalidModifier { member: String, reason: String },

    #[error("Syntax error in {context}: {error}")]
    Syntax { context: String, error: ParseError },

    #[error("Name '{name}' in the new body of '{member}' is not bound")]
    UnboundName { member: String, name: String },

    #[error("Unknown type: {identity}")]
    UnknownType { identity: TypeIdentity },

    #[error("{identity} is excluded from mutation")]
    IneligibleType { identity: TypeIdentity },

    #[error("Transaction is already {state}")]
    TransactionClosed { state: String },
}

impl ValidationError {
    /// Attach the target type to a tree edit failure
    pub fn from_edit(identity: &TypeIdentity, error: EditError) -> Self {
        let identity = identity.clone();
        match error {
            EditError::DuplicateMember { member } => Self::DuplicateMember { identity, member },
            EditError::UnknownMember { member } => Self::UnknownMember { identity, member },
            EditError::AmbiguousMember {
                selector,
                candidates,
            } => Self::AmbiguousMember {
                identity,
                selector,
                candidates,
            },
            EditError::NotAMethod { member } => Self::NotAMethod { identity, member },
            EditError::ParameterCount {
                member,
                expected,
                actual,
            } => Self::ParameterCount {
                identity,
                member,
                expected,
                actual,
            },
        }
    }
}

fn list(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The compiler rejected the batch; nothing was installed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Compilation failed: {}", list(.diagnostics))]
pub struct CompilationFailed {
    pub diagnostics: Vec<Diagnostic>,
}

/// Why a member could not be resolved for binding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Type not loaded: {identity}")]
    TypeNotLoaded { identity: TypeIdentity },

    #[error("No member '{member}' on {identity} or its ancestors")]
    MemberNotFound {
        identity: TypeIdentity,
        member: String,
    },

    #[error("{member} of {owner} is {visibility} and not accessible from {caller}")]
    NotAccessible {
        member: String,
        owner: TypeIdentity,
        visibility: String,
        caller: String,
    },

    #[error("'{member}' does not fit the requested shape: {reason}")]
    ShapeMismatch { member: String, reason: String },
}

/// A binding or compiled reference crosses a visibility boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessibilityError {
    #[error("Cannot bind {member}: {source}")]
    Binding {
        member: String,
        #[source]
        source: ResolutionError,
    },

    #[error("Access violation: {}", list(.diagnostics))]
    Compile { diagnostics: Vec<Diagnostic> },
}

/// Aggregated failure of one commit
#[derive(Error, Debug)]
#[error("Commit of {targets:?} failed{}: {cause}", partial_note(.published))]
pub struct CommitError {
    /// Every type the transaction tried to install, ascending
    pub targets: Vec<TypeIdentity>,
    /// Types whose step failed
    pub failing: Vec<TypeIdentity>,
    /// Types published before the failure; they stay published
    pub published: Vec<TypeIdentity>,
    pub cause: Box<ReflexError>,
}

fn partial_note(published: &[TypeIdentity]) -> String {
    if published.is_empty() {
        String::new()
    } else {
        let names: Vec<_> = published.iter().map(|id| id.as_str()).collect();
        format!(" after partially publishing [{}]", names.join(", "))
    }
}

impl CommitError {
    pub fn is_partial_publish(&self) -> bool {
        !self.published.is_empty()
    }
}

/// Any engine failure
#[derive(Error, Debug)]
pub enum ReflexError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    CompilationFailed(#[from] CompilationFailed),

    #[error(transparent)]
    Accessibility(#[from] AccessibilityError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A pipeline pass found its predecessor's marker missing
    #[error("Pipeline invariant violated: {0}")]
    PipelineInvariant(PipelineError),

    #[error(transparent)]
    InheritanceCycle(#[from] InheritanceCycleError),

    #[error("Host facility error: {0}")]
    HostFacility(HostFacilityError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluatorError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    /// A subtype that has to be recompiled is held by another transaction
    #[error("{identity} is held by another transaction")]
    Conflict { identity: TypeIdentity },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<HostFacilityError> for ReflexError {
    fn from(error: HostFacilityError) -> Self {
        match error {
            HostFacilityError::Pipeline(inner @ PipelineError::Invariant { .. }) => {
                Self::PipelineInvariant(inner)
            }
            other => Self::HostFacility(other),
        }
    }
}

impl From<PipelineError> for ReflexError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Store(store) => Self::Store(store),
            invariant @ PipelineError::Invariant { .. } => Self::PipelineInvariant(invariant),
            other => Self::HostFacility(HostFacilityError::Pipeline(other)),
        }
    }
}

impl ReflexError {
    /// The failure behind a commit wrapper
    pub fn root_cause(&self) -> &ReflexError {
        match self {
            ReflexError::Commit(commit) => commit.cause.root_cause(),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), ReflexError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ReflexError>;
