use thiserror::Error;

use crate::ast::TypeIdentity;

/// Evaluator-specific error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("Type error: {operation} requires {expected}, got {actual}")]
    TypeError {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Type error: cannot {operation} {left_type} and {right_type}")]
    BinaryTypeError {
        operation: String,
        left_type: String,
        right_type: String,
    },

    #[error("Type not loaded: {identity}")]
    TypeNotLoaded { identity: TypeIdentity },

    #[error("Field '{field}' not found on {owner}")]
    FieldNotFound { field: String, owner: TypeIdentity },

    #[error("Method '{method}' not found on {owner}")]
    MethodNotFound { method: String, owner: TypeIdentity },

    #[error("Method '{method}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("{member} of {owner} is {visibility} and not accessible from {caller}")]
    Inaccessible {
        member: String,
        owner: TypeIdentity,
        visibility: String,
        caller: String,
    },

    #[error("Null receiver for '{member}'")]
    NullReceiver { member: String },

    #[error("Method '{method}' on {owner} has no body")]
    MissingBody { method: String, owner: TypeIdentity },

    #[error("Unlinked {what} in {owner}; the type was not loaded through the pipeline")]
    Unlinked { what: String, owner: TypeIdentity },

    #[error("Maximum evaluation depth {limit} exceeded")]
    DepthExceeded { limit: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {operation}")]
    Overflow { operation: String },

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl EvaluatorError {
    /// Create a type error for unary operations
    pub fn unary_type_error(operation: &str, expected: &str, actual: &str) -> Self {
        Self::TypeError {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a type error for binary operations
    pub fn binary_type_error(operation: &str, left_type: &str, right_type: &str) -> Self {
        Self::BinaryTypeError {
            operation: operation.to_string(),
            left_type: left_type.to_string(),
            right_type: right_type.to_string(),
        }
    }
}
