//! Request payloads accepted by the coordinator.
//!
//! Xids travel as strings on the wire; the coordinator parses and validates
//! them, so a malformed xid is a local client error rather than a transport
//! failure.

use concord_common::{BranchStatus, BranchType, GlobalStatus};
use serde::{Deserialize, Serialize};

/// Open a new global transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBeginRequest {
    pub application_id: String,
    pub transaction_service_group: String,
    pub transaction_name: String,
    /// Session timeout in millis; 0 selects the configured default.
    pub timeout_ms: u32,
}

/// Drive a global transaction to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCommitRequest {
    pub xid: String,
}

/// Drive a global transaction to rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRollbackRequest {
    pub xid: String,
}

/// Query the current status of a global transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatusRequest {
    pub xid: String,
}

/// Client-reported outcome for modes that decide outside the coordinator
/// (e.g. TCC confirm/cancel driven by the application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalReportRequest {
    pub xid: String,
    pub global_status: GlobalStatus,
}

/// Enlist one resource manager's branch under a global transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRegisterRequest {
    pub xid: String,
    pub resource_id: String,
    pub branch_type: BranchType,
    /// Row-lock keys for AT/XA branches, opaque to the coordinator for
    /// other modes. Empty means no locks requested.
    pub lock_key: String,
    /// Identity of the registering client channel, filled in by the
    /// transport.
    pub client_id: Option<String>,
    pub application_data: Option<String>,
}

/// Report a phase-one outcome for a registered branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReportRequest {
    pub xid: String,
    pub branch_id: i64,
    pub branch_status: BranchStatus,
    pub application_data: Option<String>,
}

/// Ask the coordinator to erase a branch's compensating state at the RM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDeleteRequest {
    pub xid: String,
    pub branch_id: i64,
    pub resource_id: String,
    pub branch_type: BranchType,
}

/// Probe whether a set of row locks could be acquired by this xid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLockQueryRequest {
    pub xid: String,
    pub resource_id: String,
    pub lock_key: String,
}
