//! Error taxonomy shared across the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable failure codes carried in responses.
///
/// Client errors (malformed input, unknown xid, lock conflict) are never
/// retried by the coordinator; branch failures split into retryable and
/// unretryable variants that steer the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Unknown,
    /// A requested row lock is held by another global transaction.
    LockKeyConflict,
    Io,
    /// Branch registration was rejected.
    BranchRegisterFailed,
    /// Branch status report was rejected.
    BranchReportFailed,
    /// The (xid, branch id) pair names no live branch.
    BranchTransactionNotExist,
    /// The xid names no live global transaction.
    GlobalTransactionNotExist,
    /// The global transaction exists but no longer accepts this operation.
    GlobalTransactionNotActive,
    /// The global transaction's status forbids this operation.
    GlobalTransactionStatusInvalid,
    FailedToAddBranch,
    /// The durable session store rejected a write.
    FailedWriteSession,
    FailedStore,
    BranchCommitFailedRetryable,
    BranchCommitFailedUnretryable,
    BranchRollbackFailedRetryable,
    BranchRollbackFailedUnretryable,
    /// The participant answered with something structurally impossible.
    Broken,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A coordinator-side transaction failure with its code and context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TransactionError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransactionError {
    /// Build an error from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// An invariant was violated. Callers log these at error level before
    /// surfacing them as generic failures; they are never swallowed.
    pub fn should_never_happen(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unknown,
            message: format!("invariant violated: {}", message.into()),
        }
    }
}

/// Result alias used throughout the coordinator crates.
pub type Result<T> = std::result::Result<T, TransactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_code_and_message() {
        let err = TransactionError::new(ErrorCode::LockKeyConflict, "orders:1 held by 10:2");
        let s = err.to_string();
        assert!(s.contains("LockKeyConflict"));
        assert!(s.contains("orders:1"));
    }

    #[test]
    fn test_should_never_happen_marks_message() {
        let err = TransactionError::should_never_happen("branch list empty mid-commit");
        assert!(err.message.starts_with("invariant violated"));
    }
}
