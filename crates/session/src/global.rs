//! Global session records and their status machine.

use crate::branch::BranchSession;
use concord_common::{
    millis_now, BranchStatus, ErrorCode, GlobalStatus, Result, TransactionError, Xid,
};
use serde::{Deserialize, Serialize};

/// One global transaction: identity, status, and its ordered branches.
///
/// Branches are kept in registration order; commit and rollback fan out in
/// that order because AT lock release must follow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSession {
    pub(crate) xid: Xid,
    pub(crate) application_id: String,
    pub(crate) transaction_service_group: String,
    pub(crate) transaction_name: String,
    pub(crate) timeout_ms: u32,
    pub(crate) begin_time: u64,
    pub(crate) status: GlobalStatus,
    pub(crate) active: bool,
    pub(crate) branches: Vec<BranchSession>,
    pub(crate) retry_count: u32,
    pub(crate) last_retry_ms: u64,
    pub(crate) dead_flagged: bool,
}

impl GlobalSession {
    /// Open a new session in `Begin`.
    pub fn begin(
        xid: Xid,
        application_id: impl Into<String>,
        transaction_service_group: impl Into<String>,
        transaction_name: impl Into<String>,
        timeout_ms: u32,
    ) -> Self {
        Self {
            xid,
            application_id: application_id.into(),
            transaction_service_group: transaction_service_group.into(),
            transaction_name: transaction_name.into(),
            timeout_ms,
            begin_time: millis_now(),
            status: GlobalStatus::Begin,
            active: true,
            branches: Vec::new(),
            retry_count: 0,
            last_retry_ms: 0,
            dead_flagged: false,
        }
    }

    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    pub fn transaction_id(&self) -> i64 {
        self.xid.transaction_id()
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn transaction_service_group(&self) -> &str {
        &self.transaction_service_group
    }

    pub fn transaction_name(&self) -> &str {
        &self.transaction_name
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn begin_time(&self) -> u64 {
        self.begin_time
    }

    pub fn status(&self) -> GlobalStatus {
        self.status
    }

    /// Whether the session still accepts branch registrations.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop accepting registrations; phase two is about to start.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Move to `next`, refusing transitions the status machine forbids.
    pub fn change_status(&mut self, next: GlobalStatus) -> Result<()> {
        if !self.status.may_transition_to(next) {
            return Err(TransactionError::new(
                ErrorCode::GlobalTransactionStatusInvalid,
                format!("{} cannot move {} -> {}", self.xid, self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Append a branch; only a live `Begin` session may grow.
    pub fn add_branch(&mut self, branch: BranchSession) -> Result<()> {
        if !self.active {
            return Err(TransactionError::new(
                ErrorCode::GlobalTransactionNotActive,
                format!("{} is closed for registration", self.xid),
            ));
        }
        if self.status != GlobalStatus::Begin {
            return Err(TransactionError::new(
                ErrorCode::GlobalTransactionStatusInvalid,
                format!("{} is {}, not Begin", self.xid, self.status),
            ));
        }
        if self.branch(branch.branch_id).is_some() {
            return Err(TransactionError::new(
                ErrorCode::FailedToAddBranch,
                format!("branch {} already exists under {}", branch.branch_id, self.xid),
            ));
        }
        self.branches.push(branch);
        Ok(())
    }

    /// Look up a branch by id.
    pub fn branch(&self, branch_id: i64) -> Option<&BranchSession> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }

    /// The branches in registration order.
    pub fn branches(&self) -> &[BranchSession] {
        &self.branches
    }

    /// Update one branch's status.
    pub fn change_branch_status(&mut self, branch_id: i64, status: BranchStatus) -> Result<()> {
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| {
                TransactionError::new(
                    ErrorCode::BranchTransactionNotExist,
                    format!("branch {} not found under {}", branch_id, self.xid),
                )
            })?;
        branch.status = status;
        Ok(())
    }

    /// Replace a branch's application data (reported alongside status).
    pub fn set_branch_application_data(
        &mut self,
        branch_id: i64,
        application_data: Option<String>,
    ) -> Result<()> {
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| {
                TransactionError::new(
                    ErrorCode::BranchTransactionNotExist,
                    format!("branch {} not found under {}", branch_id, self.xid),
                )
            })?;
        branch.application_data = application_data;
        Ok(())
    }

    /// Remove a branch, returning it if present.
    pub fn remove_branch(&mut self, branch_id: i64) -> Option<BranchSession> {
        let idx = self.branches.iter().position(|b| b.branch_id == branch_id)?;
        Some(self.branches.remove(idx))
    }

    /// Whether the session outlived its declared timeout while in `Begin`.
    pub fn is_timed_out(&self, now: u64) -> bool {
        self.status == GlobalStatus::Begin
            && now > self.begin_time + u64::from(self.timeout_ms)
    }

    /// A session qualifies for async commit when every branch buffers its
    /// phase-two commit.
    pub fn can_commit_async(&self) -> bool {
        self.branches
            .iter()
            .all(|b| b.branch_type.supports_async_commit())
    }

    /// Saga sessions carry no determinative branch role; operator branch
    /// operations refuse them.
    pub fn is_saga(&self) -> bool {
        self.branches
            .first()
            .map(|b| b.branch_type.is_saga())
            .unwrap_or(false)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Record one background retry attempt.
    pub fn mark_retry(&mut self, now: u64) {
        self.retry_count += 1;
        self.last_retry_ms = now;
    }

    /// Whether a sweep should pick the session up again.
    pub fn retry_eligible(&self, now: u64, period_ms: u64) -> bool {
        now.saturating_sub(self.last_retry_ms) >= period_ms
    }

    /// Whether the retry budget (count, or wall clock when non-negative) is
    /// spent.
    pub fn retry_exhausted(&self, max_count: u32, max_timeout_ms: i64, now: u64) -> bool {
        if self.retry_count >= max_count {
            return true;
        }
        max_timeout_ms >= 0 && now.saturating_sub(self.begin_time) > max_timeout_ms as u64
    }

    /// Whether the session has been retried past the dead threshold and not
    /// yet reported. Marks it reported on first hit.
    pub fn flag_if_dead(&mut self, threshold_ms: u64, now: u64) -> bool {
        if self.dead_flagged || self.retry_count == 0 {
            return false;
        }
        if now.saturating_sub(self.begin_time) > threshold_ms {
            self.dead_flagged = true;
            return true;
        }
        false
    }
}
