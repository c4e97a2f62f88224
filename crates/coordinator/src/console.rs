//! Operator (console) operations.
//!
//! These reuse the same state machines as the RPC handlers — an operator
//! cannot push a session anywhere the protocol itself could not — and they
//! return typed errors instead of response headers because they run
//! in-process.

use crate::coordinator::{Coordinator, RmOp};
use crate::error::{ConsoleResult, CoordinatorError};
use concord_common::{BranchStatus, GlobalStatus, Xid};
use concord_session::SessionHandle;
use std::sync::Arc;

impl Coordinator {
    fn console_session(&self, xid: &str) -> ConsoleResult<Arc<SessionHandle>> {
        let xid: Xid = xid
            .parse()
            .map_err(|_| CoordinatorError::IllegalOperation(format!("malformed xid: {}", xid)))?;
        self.sessions()
            .find(xid.transaction_id())
            .ok_or_else(|| CoordinatorError::NotFound(format!("no global transaction {}", xid)))
    }

    /// Pause a retrying session so the sweeps stop re-driving it.
    pub async fn stop_global_retry(&self, xid: &str) -> ConsoleResult<GlobalStatus> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;
        let next = match session.status() {
            GlobalStatus::CommitRetrying => GlobalStatus::StopCommitOrCommitRetry,
            GlobalStatus::RollbackRetrying | GlobalStatus::TimeoutRollbackRetrying => {
                GlobalStatus::StopRollbackOrRollbackRetry
            }
            other => {
                return Err(CoordinatorError::IllegalOperation(format!(
                    "cannot pause a session in {}",
                    other
                )))
            }
        };
        self.transition(&mut session, next)?;
        tracing::info!(xid = %session.xid(), status = %next, "retry paused by operator");
        Ok(next)
    }

    /// Resume a paused session onto its retry path.
    pub async fn start_global_retry(&self, xid: &str) -> ConsoleResult<GlobalStatus> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;
        let next = match session.status() {
            GlobalStatus::StopCommitOrCommitRetry => GlobalStatus::CommitRetrying,
            GlobalStatus::StopRollbackOrRollbackRetry => GlobalStatus::RollbackRetrying,
            other => {
                return Err(CoordinatorError::IllegalOperation(format!(
                    "cannot resume a session in {}",
                    other
                )))
            }
        };
        self.transition(&mut session, next)?;
        tracing::info!(xid = %session.xid(), status = %next, "retry resumed by operator");
        Ok(next)
    }

    /// Exclude one branch from retry sweeps.
    pub async fn stop_branch_retry(&self, xid: &str, branch_id: i64) -> ConsoleResult<()> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;

        if session.is_saga() {
            return Err(CoordinatorError::IllegalOperation(
                "saga sessions have no determinative branch role to operate on".to_string(),
            ));
        }
        let branch = session.branch(branch_id).ok_or_else(|| {
            CoordinatorError::NotFound(format!("branch {} under {}", branch_id, xid))
        })?;
        if branch.status == BranchStatus::StopRetry {
            return Err(CoordinatorError::IllegalOperation(
                "branch retry is already stopped".to_string(),
            ));
        }
        if !branch.status.can_stop_retry() {
            return Err(CoordinatorError::IllegalOperation(format!(
                "branch in {} does not support stopping retry",
                branch.status
            )));
        }
        let global_status = session.status();
        let stoppable = global_status.is_retrying()
            || global_status.is_paused()
            || matches!(
                global_status,
                GlobalStatus::Committing | GlobalStatus::Rollbacking | GlobalStatus::TimeoutRollbacking
            );
        if !stoppable {
            return Err(CoordinatorError::IllegalOperation(format!(
                "global status {} does not support stopping branch retry",
                global_status
            )));
        }

        session.change_branch_status(branch_id, BranchStatus::StopRetry)?;
        if let Some(branch) = session.branch(branch_id) {
            self.sessions().persist_branch(&session, branch)?;
        }
        tracing::info!(xid = %session.xid(), branch_id, "branch retry stopped by operator");
        Ok(())
    }

    /// Put a stopped branch back on the retry path.
    pub async fn start_branch_retry(&self, xid: &str, branch_id: i64) -> ConsoleResult<()> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;

        if session.is_saga() {
            return Err(CoordinatorError::IllegalOperation(
                "saga sessions have no determinative branch role to operate on".to_string(),
            ));
        }
        let branch = session.branch(branch_id).ok_or_else(|| {
            CoordinatorError::NotFound(format!("branch {} under {}", branch_id, xid))
        })?;
        if branch.status != BranchStatus::StopRetry {
            return Err(CoordinatorError::IllegalOperation(format!(
                "branch in {} is not stopped",
                branch.status
            )));
        }

        session.change_branch_status(branch_id, BranchStatus::Registered)?;
        if let Some(branch) = session.branch(branch_id) {
            self.sessions().persist_branch(&session, branch)?;
        }
        tracing::info!(xid = %session.xid(), branch_id, "branch retry resumed by operator");
        Ok(())
    }

    /// Remove a stuck session: best-effort `branch_delete` against every
    /// RM, then drop the session and its locks.
    ///
    /// Fails with [`CoordinatorError::Incomplete`] if any RM refuses; the
    /// remaining branches stay for a later attempt.
    pub async fn delete_global_session(&self, xid: &str) -> ConsoleResult<()> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;

        let status = session.status();
        let deletable = status.is_retrying()
            || status.is_paused()
            || matches!(
                status,
                GlobalStatus::CommitFailed
                    | GlobalStatus::RollbackFailed
                    | GlobalStatus::TimeoutRollbackFailed
                    | GlobalStatus::Deleting
            );
        if !deletable {
            return Err(CoordinatorError::IllegalOperation(format!(
                "global status {} does not support deletion",
                status
            )));
        }
        if status != GlobalStatus::Deleting {
            self.transition(&mut session, GlobalStatus::Deleting)?;
        }

        let timeout_ms = self.config().get().rm_request_timeout_ms;
        let branches = session.branches().to_vec();
        for branch in branches {
            let outcome = self
                .call_rm(RmOp::Delete, session.xid().clone(), &branch, timeout_ms)
                .await;
            if outcome.is_settled() {
                self.discard_branch(&mut session, &branch)?;
            } else {
                return Err(CoordinatorError::Incomplete(format!(
                    "branch {} delete was refused ({:?}); session stays in Deleting",
                    branch.branch_id, outcome
                )));
            }
        }

        self.end_success(&mut session, GlobalStatus::Finished)?;
        Ok(())
    }

    /// Remove a session without consulting any RM.
    ///
    /// Escape hatch for divergent state; the branches' compensating state
    /// at the RMs is abandoned.
    pub async fn force_delete_global_session(&self, xid: &str) -> ConsoleResult<()> {
        let handle = self.console_session(xid)?;
        let mut session = handle.lock().await;

        tracing::warn!(
            xid = %session.xid(),
            status = %session.status(),
            branches = session.branches().len(),
            "force deleting global session; RM-side state is abandoned"
        );
        let branches = session.branches().to_vec();
        for branch in branches {
            self.discard_branch(&mut session, &branch)?;
        }
        self.locks().release_xid(session.xid());
        self.sessions().end(&session)?;
        Ok(())
    }
}
