//! Execution error types for the runner backends.
//!
//! Backend diagnostics are carried verbatim; the dispatcher never rewrites
//! or retries them.

use thiserror::Error;

use crate::tensor::DType;

/// Errors reported by a runner while executing a compiled entry point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Expected {expected} inputs, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Input {index}: expected dtype {expected}, got {actual}")]
    DTypeMismatch {
        index: usize,
        expected: DType,
        actual: DType,
    },

    #[error("Input {index}: shape {actual:?} does not match {expected}")]
    ShapeMismatch {
        index: usize,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("{0}")]
    Backend(String),

    #[error("Dispatch task aborted: {0}")]
    Aborted(String),
}

impl ExecutionError {
    /// Returns true if the caller passed inputs that do not fit the entry point.
    pub fn is_input_mismatch(&self) -> bool {
        matches!(
            self,
            Self::ArityMismatch { .. } | Self::DTypeMismatch { .. } | Self::ShapeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_message_is_verbatim() {
        let err = ExecutionError::Backend("kernel fault at node %37".into());
        assert_eq!(err.to_string(), "kernel fault at node %37");
        assert!(!err.is_input_mismatch());
    }

    #[test]
    fn test_mismatch_display() {
        let err = ExecutionError::DTypeMismatch {
            index: 1,
            expected: DType::F32,
            actual: DType::I64,
        };
        assert!(err.to_string().contains("f32"));
        assert!(err.to_string().contains("i64"));
        assert!(err.is_input_mismatch());
    }
}
