//! Response payloads returned by the coordinator.

use concord_common::{BranchStatus, ErrorCode, GlobalStatus, TransactionError};
use serde::{Deserialize, Serialize};

/// Outcome class of a request.
///
/// `RateLimited` is control flow, not failure: the client should back off
/// and retry the begin rather than treat the transaction as broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    Failed,
    RateLimited,
}

/// Result header carried by every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultHeader {
    pub code: ResultCode,
    pub error: Option<ErrorCode>,
    pub message: Option<String>,
}

impl ResultHeader {
    /// A successful outcome.
    pub fn success() -> Self {
        Self {
            code: ResultCode::Success,
            error: None,
            message: None,
        }
    }

    /// A failure carrying the transaction error's code and message.
    pub fn failed(err: &TransactionError) -> Self {
        Self {
            code: ResultCode::Failed,
            error: Some(err.code),
            message: Some(err.message.clone()),
        }
    }

    /// The begin gate was closed by the rate limiter.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::RateLimited,
            error: None,
            message: Some(message.into()),
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBeginResponse {
    pub header: ResultHeader,
    /// The assigned xid on success.
    pub xid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCommitResponse {
    pub header: ResultHeader,
    pub global_status: GlobalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRollbackResponse {
    pub header: ResultHeader,
    pub global_status: GlobalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatusResponse {
    pub header: ResultHeader,
    pub global_status: GlobalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalReportResponse {
    pub header: ResultHeader,
    pub global_status: GlobalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRegisterResponse {
    pub header: ResultHeader,
    /// The assigned branch id on success.
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReportResponse {
    pub header: ResultHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDeleteResponse {
    pub header: ResultHeader,
    /// `PhaseTwoRollbacked` signals the RM erased the branch's state.
    pub branch_status: BranchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLockQueryResponse {
    pub header: ResultHeader,
    pub lockable: bool,
}
