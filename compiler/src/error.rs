//! Lowering errors
//!
//! Every variant is an internal invariant violation: lowering of the module
//! stops at the first one. Exceptions thrown by the source program are data
//! flowing through landing pads and never show up here.

use crate::hir::VarId;
use crate::ir::{IrBlockId, IrSourceLocation};
use thiserror::Error;

pub type LoweringResult<T> = Result<T, LoweringError>;

#[derive(Debug, Clone, Error)]
pub enum LoweringError {
    #[error("Unsupported node `{node}` at {location}: it must be eliminated before lowering")]
    Unsupported {
        node: &'static str,
        location: IrSourceLocation,
    },

    #[error("Type mismatch at {location}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        location: IrSourceLocation,
    },

    #[error("Unbound variable {var} at {location}")]
    UnboundVariable {
        var: VarId,
        location: IrSourceLocation,
    },

    #[error("Unresolved declaration: {name}")]
    UnresolvedDeclaration { name: String },

    #[error("`{operation}` reached the top-level scope")]
    InvalidControlTransfer { operation: &'static str },

    #[error("Missing argument {index} in call to {callee}")]
    MissingArgument { callee: String, index: usize },

    #[error("Call to {callee} passes {found} arguments, expected {expected}")]
    ExtraArguments {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("Cannot append to terminated block {block} in {function}")]
    TerminatedBlock { function: String, block: IrBlockId },

    #[error("Internal lowering error: {message}")]
    Internal { message: String },

    #[error("Verification of {function} failed: {message}")]
    Verification {
        function: String,
        message: String,
        dump: String,
    },
}

impl LoweringError {
    pub fn internal(message: impl Into<String>) -> Self {
        LoweringError::Internal {
            message: message.into(),
        }
    }

    pub fn unresolved(name: impl Into<String>) -> Self {
        LoweringError::UnresolvedDeclaration { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LoweringError::Unsupported {
            node: "SafeCast",
            location: IrSourceLocation::new(1, 4, 2),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported node `SafeCast` at file1:4:2: it must be eliminated before lowering"
        );

        let err = LoweringError::InvalidControlTransfer { operation: "break" };
        assert_eq!(err.to_string(), "`break` reached the top-level scope");
    }
}
