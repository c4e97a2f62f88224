//! Error types for coordinator and operator operations.

use concord_common::TransactionError;
use thiserror::Error;

/// Failures surfaced by operator (console) operations.
///
/// RPC handlers never return these — they fold failures into response
/// headers — but operator calls are in-process and keep typed errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The requested operation is not valid for the session's or branch's
    /// current state. Never retried.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Branch cleanup could not finish; the caller should try again later.
    #[error("incomplete: {0}")]
    Incomplete(String),
}

/// Result alias for operator operations.
pub type ConsoleResult<T> = std::result::Result<T, CoordinatorError>;
