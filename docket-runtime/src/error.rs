//! Runtime error types.

use docket_core::OperationId;
use thiserror::Error;

use crate::interrupt::InterruptReason;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in runtime operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// The operation was interrupted while waiting.
    ///
    /// Raised by every interruptible wait when the operation is killed or
    /// its deadline passes. The wait leaves the caller's state untouched.
    #[error("operation {op_id} interrupted: {reason}")]
    Interrupted {
        /// The interrupted operation.
        op_id: OperationId,
        /// Why the operation was interrupted.
        reason: InterruptReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_display() {
        let err = RuntimeError::Interrupted {
            op_id: OperationId::new(12),
            reason: InterruptReason::Killed,
        };
        let msg = err.to_string();
        assert!(msg.contains("op:12"));
        assert!(msg.contains("killed"));
    }
}
