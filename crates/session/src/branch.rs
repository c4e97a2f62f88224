//! Branch session records.

use concord_common::{BranchStatus, BranchType};
use serde::{Deserialize, Serialize};

/// One resource manager's participation in a global transaction.
///
/// Owned exclusively by its [`GlobalSession`](crate::GlobalSession); the
/// owning xid is a lookup key on the wire, not a back-reference, so the
/// record is a plain value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSession {
    pub branch_id: i64,
    pub resource_id: String,
    pub branch_type: BranchType,
    /// Encoded row locks for AT/XA branches; opaque for other modes.
    pub lock_key: String,
    pub client_id: Option<String>,
    pub application_data: Option<String>,
    pub status: BranchStatus,
}

impl BranchSession {
    /// A freshly registered branch.
    pub fn new(
        branch_id: i64,
        resource_id: impl Into<String>,
        branch_type: BranchType,
        lock_key: impl Into<String>,
        client_id: Option<String>,
        application_data: Option<String>,
    ) -> Self {
        Self {
            branch_id,
            resource_id: resource_id.into(),
            branch_type,
            lock_key: lock_key.into(),
            client_id,
            application_data,
            status: BranchStatus::Registered,
        }
    }
}
