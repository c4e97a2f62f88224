//! The coordinator: request handlers and phase-two drive logic.
//!
//! Every handler follows the same discipline: validate the request shape,
//! look the session up, enter its per-xid critical section, mutate and
//! persist, and only then talk to resource managers. Phase-two fan-out
//! walks branches in registration order because AT lock release must
//! follow it; a retryable branch failure parks the session for the sweeps
//! in `retry.rs`, an unretryable one terminates it for the operator.

use crate::error::ConsoleResult;
use crate::ratelimit::TokenBucket;
use crate::resource::{BranchContext, BranchOutcome, ResourceRegistry};
use concord_common::{
    BranchStatus, ConfigHandle, ErrorCode, GlobalStatus, IdGenerator, Result, TransactionError,
    Xid,
};
use concord_lock::{parse_lock_key, LockRegistry};
use concord_protocol::{
    BranchDeleteRequest, BranchDeleteResponse, BranchRegisterRequest, BranchRegisterResponse,
    BranchReportRequest, BranchReportResponse, GlobalBeginRequest, GlobalBeginResponse,
    GlobalCommitRequest, GlobalCommitResponse, GlobalLockQueryRequest, GlobalLockQueryResponse,
    GlobalReportRequest, GlobalReportResponse, GlobalRollbackRequest, GlobalRollbackResponse,
    GlobalStatusRequest, GlobalStatusResponse, RequestMessage, ResponseMessage, ResultHeader,
};
use concord_session::{BranchSession, GlobalSession, SessionLifecycle, SessionManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Which phase-two call to dispatch to a resource manager.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RmOp {
    Commit,
    Rollback,
    Delete,
}

/// The transaction coordinator.
///
/// Explicitly constructed and shared as `Arc<Coordinator>`; there is no
/// process-global instance.
pub struct Coordinator {
    address: String,
    config: ConfigHandle,
    sessions: Arc<SessionManager>,
    locks: Arc<LockRegistry>,
    resources: Arc<ResourceRegistry>,
    limiter: TokenBucket,
    ids: IdGenerator,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Logs session lifecycle edges through the manager's hook seam.
struct SessionLogger;

impl SessionLifecycle for SessionLogger {
    fn on_begin(&self, session: &GlobalSession) {
        tracing::debug!(xid = %session.xid(), "session opened");
    }

    fn on_status_change(&self, session: &GlobalSession, from: GlobalStatus) {
        tracing::debug!(xid = %session.xid(), %from, to = %session.status(), "session status changed");
    }

    fn on_end(&self, session: &GlobalSession) {
        tracing::debug!(xid = %session.xid(), status = %session.status(), "session removed");
    }
}

impl Coordinator {
    /// Wire a coordinator from its parts.
    pub fn new(
        address: impl Into<String>,
        node_id: u16,
        config: ConfigHandle,
        sessions: Arc<SessionManager>,
        locks: Arc<LockRegistry>,
        resources: Arc<ResourceRegistry>,
    ) -> Arc<Self> {
        let limiter = TokenBucket::new(&config.get().rate_limit);
        sessions.add_listener(Arc::new(SessionLogger));
        Arc::new(Self {
            address: address.into(),
            config,
            sessions,
            locks,
            resources,
            limiter,
            ids: IdGenerator::new(node_id),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Reload sessions from the store and rebuild the lock registry.
    ///
    /// Must run before the coordinator accepts traffic: rows still owned by
    /// recovering transactions would otherwise look unlocked. Sessions that
    /// died mid-commit or mid-rollback resume through the sweeps.
    pub fn restore(&self) -> Result<usize> {
        let restored = self.sessions.restore()?;

        let mut entries = Vec::new();
        for session in &restored {
            for branch in session.branches() {
                if !branch.branch_type.holds_row_locks() {
                    continue;
                }
                match parse_lock_key(&branch.lock_key) {
                    Ok(rows) => entries.push((
                        session.xid().clone(),
                        branch.branch_id,
                        branch.resource_id.clone(),
                        rows,
                    )),
                    Err(err) => {
                        // A persisted branch carried this key before; refuse
                        // to continue with a hole in the lock table.
                        return Err(TransactionError::should_never_happen(format!(
                            "persisted branch {} has unparseable lock key: {}",
                            branch.branch_id, err
                        )));
                    }
                }
            }
        }
        self.locks.reload(
            entries
                .iter()
                .map(|(xid, branch_id, resource_id, rows)| {
                    (xid, *branch_id, resource_id.as_str(), rows.as_slice())
                }),
        );

        if !restored.is_empty() {
            tracing::info!(sessions = restored.len(), "restored sessions from store");
        }
        Ok(restored.len())
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Dispatch a typed request to its handler.
    pub async fn on_request(&self, request: RequestMessage) -> ResponseMessage {
        match request {
            RequestMessage::GlobalBegin(r) => ResponseMessage::GlobalBegin(self.begin(&r).await),
            RequestMessage::GlobalCommit(r) => ResponseMessage::GlobalCommit(self.commit(&r).await),
            RequestMessage::GlobalRollback(r) => {
                ResponseMessage::GlobalRollback(self.rollback(&r).await)
            }
            RequestMessage::GlobalStatus(r) => {
                ResponseMessage::GlobalStatus(self.global_status(&r).await)
            }
            RequestMessage::GlobalReport(r) => {
                ResponseMessage::GlobalReport(self.global_report(&r).await)
            }
            RequestMessage::BranchRegister(r) => {
                ResponseMessage::BranchRegister(self.branch_register(&r).await)
            }
            RequestMessage::BranchReport(r) => {
                ResponseMessage::BranchReport(self.branch_report(&r).await)
            }
            RequestMessage::BranchDelete(r) => {
                ResponseMessage::BranchDelete(self.branch_delete(&r).await)
            }
            RequestMessage::GlobalLockQuery(r) => {
                ResponseMessage::GlobalLockQuery(self.lock_query(&r).await)
            }
        }
    }

    // === Global transaction handlers ===

    /// Open a global transaction and hand back its xid.
    pub async fn begin(&self, request: &GlobalBeginRequest) -> GlobalBeginResponse {
        let config = self.config.get();
        if !self.limiter.try_acquire(&config.rate_limit) {
            tracing::warn!(
                application_id = %request.application_id,
                "global begin rejected by rate limiter"
            );
            return GlobalBeginResponse {
                header: ResultHeader::rate_limited("begin rate exceeded, back off and retry"),
                xid: None,
            };
        }

        let timeout_ms = if request.timeout_ms == 0 {
            config.default_global_timeout_ms
        } else {
            request.timeout_ms
        };
        let xid = Xid::new(self.address.clone(), self.ids.next_id());
        let session = GlobalSession::begin(
            xid.clone(),
            &request.application_id,
            &request.transaction_service_group,
            &request.transaction_name,
            timeout_ms,
        );

        match self.sessions.begin(session) {
            Ok(_) => {
                tracing::info!(
                    %xid,
                    name = %request.transaction_name,
                    timeout_ms,
                    "global transaction begun"
                );
                GlobalBeginResponse {
                    header: ResultHeader::success(),
                    xid: Some(xid.to_string()),
                }
            }
            Err(err) => {
                tracing::error!(%xid, error = %err, "global begin failed");
                GlobalBeginResponse {
                    header: ResultHeader::failed(&err),
                    xid: None,
                }
            }
        }
    }

    /// Drive a global transaction to commit.
    pub async fn commit(&self, request: &GlobalCommitRequest) -> GlobalCommitResponse {
        match self.do_commit(&request.xid).await {
            Ok(status) => GlobalCommitResponse {
                header: ResultHeader::success(),
                global_status: status,
            },
            Err(err) => {
                tracing::error!(xid = %request.xid, error = %err, "global commit failed");
                GlobalCommitResponse {
                    header: ResultHeader::failed(&err),
                    global_status: self.status_for_error(&request.xid).await,
                }
            }
        }
    }

    async fn do_commit(&self, xid_str: &str) -> Result<GlobalStatus> {
        let xid = self.parse_xid(xid_str)?;
        let handle = match self.sessions.find(xid.transaction_id()) {
            Some(handle) => handle,
            // Late or duplicate commit of a transaction that already ended.
            None => return Ok(GlobalStatus::Finished),
        };
        let mut session = handle.lock().await;
        if session.status() != GlobalStatus::Begin {
            return Ok(session.status());
        }
        session.deactivate();

        if session.branches().is_empty() {
            self.end_success(&mut session, GlobalStatus::Committed)?;
            return Ok(GlobalStatus::Committed);
        }

        if session.can_commit_async() {
            self.transition(&mut session, GlobalStatus::AsyncCommitting)?;
            // The client sees success now; the async sweep runs phase two.
            return Ok(GlobalStatus::Committed);
        }

        self.transition(&mut session, GlobalStatus::Committing)?;
        self.drive_commit(&mut session).await
    }

    /// Drive a global transaction to rollback.
    pub async fn rollback(&self, request: &GlobalRollbackRequest) -> GlobalRollbackResponse {
        match self.do_rollback(&request.xid).await {
            Ok(status) => GlobalRollbackResponse {
                header: ResultHeader::success(),
                global_status: status,
            },
            Err(err) => {
                tracing::error!(xid = %request.xid, error = %err, "global rollback failed");
                GlobalRollbackResponse {
                    header: ResultHeader::failed(&err),
                    global_status: self.status_for_error(&request.xid).await,
                }
            }
        }
    }

    async fn do_rollback(&self, xid_str: &str) -> Result<GlobalStatus> {
        let xid = self.parse_xid(xid_str)?;
        let handle = match self.sessions.find(xid.transaction_id()) {
            Some(handle) => handle,
            None => return Ok(GlobalStatus::Finished),
        };
        let mut session = handle.lock().await;
        if session.status() != GlobalStatus::Begin {
            // Duplicate rollback, or phase two already under way: report
            // where the session stands instead of failing the caller.
            return Ok(session.status());
        }
        session.deactivate();
        self.transition(&mut session, GlobalStatus::Rollbacking)?;
        self.drive_rollback(&mut session).await
    }

    /// Answer the current status of a global transaction.
    pub async fn global_status(&self, request: &GlobalStatusRequest) -> GlobalStatusResponse {
        match self.parse_xid(&request.xid) {
            Ok(xid) => GlobalStatusResponse {
                header: ResultHeader::success(),
                global_status: self.current_status(&xid).await,
            },
            Err(err) => GlobalStatusResponse {
                header: ResultHeader::failed(&err),
                global_status: GlobalStatus::Unknown,
            },
        }
    }

    /// Accept a client-reported outcome (TCC/Saga style self-report).
    pub async fn global_report(&self, request: &GlobalReportRequest) -> GlobalReportResponse {
        match self.do_report(&request.xid, request.global_status).await {
            Ok(status) => GlobalReportResponse {
                header: ResultHeader::success(),
                global_status: status,
            },
            Err(err) => {
                tracing::error!(xid = %request.xid, error = %err, "global report failed");
                GlobalReportResponse {
                    header: ResultHeader::failed(&err),
                    global_status: self.status_for_error(&request.xid).await,
                }
            }
        }
    }

    async fn do_report(&self, xid_str: &str, reported: GlobalStatus) -> Result<GlobalStatus> {
        let xid = self.parse_xid(xid_str)?;
        let handle = self.sessions.require(xid.transaction_id())?;
        let mut session = handle.lock().await;

        match reported {
            GlobalStatus::Committed
            | GlobalStatus::Rollbacked
            | GlobalStatus::TimeoutRollbacked
            | GlobalStatus::Finished => {
                session.deactivate();
                self.end_success(&mut session, reported)?;
                Ok(reported)
            }
            GlobalStatus::CommitFailed
            | GlobalStatus::RollbackFailed
            | GlobalStatus::TimeoutRollbackFailed => {
                session.deactivate();
                self.end_failed(&mut session, reported, false)?;
                Ok(reported)
            }
            other => {
                if other != GlobalStatus::Begin {
                    session.deactivate();
                }
                self.transition(&mut session, other)?;
                Ok(other)
            }
        }
    }

    // === Branch handlers ===

    /// Register a branch under a global transaction, acquiring its locks.
    pub async fn branch_register(&self, request: &BranchRegisterRequest) -> BranchRegisterResponse {
        match self.do_branch_register(request).await {
            Ok(branch_id) => BranchRegisterResponse {
                header: ResultHeader::success(),
                branch_id: Some(branch_id),
            },
            Err(err) => {
                // Lock conflicts are routine contention, not coordinator
                // trouble; keep them off the error log.
                if err.code == ErrorCode::LockKeyConflict {
                    tracing::warn!(xid = %request.xid, error = %err, "branch register lock conflict");
                } else {
                    tracing::error!(xid = %request.xid, error = %err, "branch register failed");
                }
                BranchRegisterResponse {
                    header: ResultHeader::failed(&err),
                    branch_id: None,
                }
            }
        }
    }

    async fn do_branch_register(&self, request: &BranchRegisterRequest) -> Result<i64> {
        let xid = self.parse_xid(&request.xid)?;
        let handle = self.sessions.require(xid.transaction_id())?;
        let mut session = handle.lock().await;

        if !session.is_active() || session.status() != GlobalStatus::Begin {
            return Err(TransactionError::new(
                ErrorCode::GlobalTransactionNotActive,
                format!(
                    "{} no longer accepts branches (status {})",
                    xid,
                    session.status()
                ),
            ));
        }

        let rows = if request.branch_type.holds_row_locks() {
            parse_lock_key(&request.lock_key).map_err(|err| {
                TransactionError::new(ErrorCode::BranchRegisterFailed, err.to_string())
            })?
        } else {
            Vec::new()
        };

        let branch_id = self.ids.next_id();
        if !rows.is_empty() {
            self.locks
                .try_lock(session.xid(), branch_id, &request.resource_id, &rows)
                .map_err(|conflict| {
                    TransactionError::new(ErrorCode::LockKeyConflict, conflict.to_string())
                })?;
        }

        let branch = BranchSession::new(
            branch_id,
            &request.resource_id,
            request.branch_type,
            &request.lock_key,
            request.client_id.clone(),
            request.application_data.clone(),
        );

        if let Err(err) = session.add_branch(branch.clone()) {
            self.locks
                .unlock_branch(session.xid(), branch_id, &request.resource_id, &rows);
            return Err(err);
        }
        if let Err(err) = self.sessions.persist_branch(&session, &branch) {
            session.remove_branch(branch_id);
            self.locks
                .unlock_branch(session.xid(), branch_id, &request.resource_id, &rows);
            return Err(err);
        }

        tracing::info!(
            %xid,
            branch_id,
            resource_id = %request.resource_id,
            branch_type = ?request.branch_type,
            "branch registered"
        );
        Ok(branch_id)
    }

    /// Record a phase-one outcome reported by a resource manager.
    pub async fn branch_report(&self, request: &BranchReportRequest) -> BranchReportResponse {
        match self.do_branch_report(request).await {
            Ok(()) => BranchReportResponse {
                header: ResultHeader::success(),
            },
            Err(err) => {
                tracing::error!(
                    xid = %request.xid,
                    branch_id = request.branch_id,
                    error = %err,
                    "branch report failed"
                );
                BranchReportResponse {
                    header: ResultHeader::failed(&err),
                }
            }
        }
    }

    async fn do_branch_report(&self, request: &BranchReportRequest) -> Result<()> {
        let xid = self.parse_xid(&request.xid)?;
        let handle = self.sessions.require(xid.transaction_id())?;
        let mut session = handle.lock().await;

        session.change_branch_status(request.branch_id, request.branch_status)?;
        if request.application_data.is_some() {
            session
                .set_branch_application_data(request.branch_id, request.application_data.clone())?;
        }
        if let Some(branch) = session.branch(request.branch_id) {
            self.sessions.persist_branch(&session, branch)?;
        }
        Ok(())
    }

    /// Ask the owning RM to erase a branch's compensating state, then drop
    /// the branch.
    pub async fn branch_delete(&self, request: &BranchDeleteRequest) -> BranchDeleteResponse {
        match self.do_branch_delete(request).await {
            Ok(status) => BranchDeleteResponse {
                header: ResultHeader::success(),
                branch_status: status,
            },
            Err((err, status)) => {
                tracing::error!(
                    xid = %request.xid,
                    branch_id = request.branch_id,
                    error = %err,
                    "branch delete failed"
                );
                BranchDeleteResponse {
                    header: ResultHeader::failed(&err),
                    branch_status: status,
                }
            }
        }
    }

    async fn do_branch_delete(
        &self,
        request: &BranchDeleteRequest,
    ) -> std::result::Result<BranchStatus, (TransactionError, BranchStatus)> {
        let xid = self
            .parse_xid(&request.xid)
            .map_err(|e| (e, BranchStatus::Unknown))?;
        let handle = match self.sessions.find(xid.transaction_id()) {
            Some(handle) => handle,
            // Session already ended: a redelivered delete has nothing left
            // to erase.
            None => return Ok(BranchStatus::PhaseTwoRollbacked),
        };
        let mut session = handle.lock().await;

        let branch = match session.branch(request.branch_id) {
            Some(branch) => branch.clone(),
            None => return Ok(BranchStatus::PhaseTwoRollbacked),
        };

        let timeout_ms = self.config.get().rm_request_timeout_ms;
        let outcome = self
            .call_rm(RmOp::Delete, session.xid().clone(), &branch, timeout_ms)
            .await;
        if outcome.is_settled() {
            self.discard_branch(&mut session, &branch)
                .map_err(|e| (e, branch.status))?;
            Ok(BranchStatus::PhaseTwoRollbacked)
        } else {
            let err = match outcome {
                BranchOutcome::Retryable(reason) => TransactionError::new(
                    ErrorCode::BranchRollbackFailedRetryable,
                    format!("branch delete failed: {}", reason),
                ),
                BranchOutcome::Permanent(reason) => TransactionError::new(
                    ErrorCode::BranchRollbackFailedUnretryable,
                    format!("branch delete failed: {}", reason),
                ),
                _ => TransactionError::should_never_happen("settled outcome in failure arm"),
            };
            Err((err, branch.status))
        }
    }

    /// Probe whether the xid could acquire the given locks.
    pub async fn lock_query(&self, request: &GlobalLockQueryRequest) -> GlobalLockQueryResponse {
        let result = (|| {
            let xid = self.parse_xid(&request.xid)?;
            let rows = parse_lock_key(&request.lock_key).map_err(|err| {
                TransactionError::new(ErrorCode::Unknown, format!("malformed lock key: {}", err))
            })?;
            Ok(self.locks.is_lockable(&xid, &request.resource_id, &rows))
        })();
        match result {
            Ok(lockable) => GlobalLockQueryResponse {
                header: ResultHeader::success(),
                lockable,
            },
            Err(err) => GlobalLockQueryResponse {
                header: ResultHeader::failed(&err),
                lockable: false,
            },
        }
    }

    // === Phase-two drive logic (shared by handlers and sweeps) ===

    /// Walk the branches of a committing session in registration order.
    ///
    /// Returns the status the session ends this pass in.
    pub(crate) async fn drive_commit(&self, session: &mut GlobalSession) -> Result<GlobalStatus> {
        let timeout_ms = self.config.get().rm_request_timeout_ms;
        let branch_ids: Vec<i64> = session.branches().iter().map(|b| b.branch_id).collect();
        let mut deferred = false;

        for branch_id in branch_ids {
            let branch = match session.branch(branch_id) {
                Some(branch) => branch.clone(),
                None => continue,
            };
            match branch.status {
                // Phase one never succeeded; nothing to commit at the RM.
                BranchStatus::PhaseOneFailed => {
                    self.discard_branch(session, &branch)?;
                    continue;
                }
                // Redelivered commit already acknowledged earlier.
                BranchStatus::PhaseTwoCommitted => {
                    self.discard_branch(session, &branch)?;
                    continue;
                }
                BranchStatus::StopRetry => {
                    deferred = true;
                    continue;
                }
                _ => {}
            }

            let outcome = self
                .call_rm(RmOp::Commit, session.xid().clone(), &branch, timeout_ms)
                .await;
            match outcome {
                BranchOutcome::Done | BranchOutcome::NotFound => {
                    session.change_branch_status(branch_id, BranchStatus::PhaseTwoCommitted)?;
                    self.discard_branch(session, &branch)?;
                }
                BranchOutcome::Retryable(reason) => {
                    tracing::warn!(
                        xid = %session.xid(),
                        branch_id,
                        %reason,
                        "branch commit failed, leaving for retry"
                    );
                    session.change_branch_status(
                        branch_id,
                        BranchStatus::PhaseTwoCommitFailedRetryable,
                    )?;
                    if let Some(updated) = session.branch(branch_id) {
                        self.sessions.persist_branch(session, updated)?;
                    }
                    self.transition(session, GlobalStatus::CommitRetrying)?;
                    return Ok(GlobalStatus::CommitRetrying);
                }
                BranchOutcome::Permanent(reason) => {
                    tracing::error!(
                        xid = %session.xid(),
                        branch_id,
                        %reason,
                        "branch commit failed permanently"
                    );
                    session.change_branch_status(
                        branch_id,
                        BranchStatus::PhaseTwoCommitFailedUnretryable,
                    )?;
                    if let Some(updated) = session.branch(branch_id) {
                        self.sessions.persist_branch(session, updated)?;
                    }
                    self.end_failed(session, GlobalStatus::CommitFailed, true)?;
                    return Ok(GlobalStatus::CommitFailed);
                }
            }
        }

        if deferred {
            if session.status() != GlobalStatus::CommitRetrying {
                self.transition(session, GlobalStatus::CommitRetrying)?;
            }
            return Ok(session.status());
        }

        self.end_success(session, GlobalStatus::Committed)?;
        Ok(GlobalStatus::Committed)
    }

    /// Walk the branches of a rollbacking session in registration order.
    pub(crate) async fn drive_rollback(&self, session: &mut GlobalSession) -> Result<GlobalStatus> {
        let config = self.config.get();
        let timeout_family = matches!(
            session.status(),
            GlobalStatus::TimeoutRollbacking | GlobalStatus::TimeoutRollbackRetrying
        );
        let (retrying_status, failed_status, done_status) = if timeout_family {
            (
                GlobalStatus::TimeoutRollbackRetrying,
                GlobalStatus::TimeoutRollbackFailed,
                GlobalStatus::TimeoutRollbacked,
            )
        } else {
            (
                GlobalStatus::RollbackRetrying,
                GlobalStatus::RollbackFailed,
                GlobalStatus::Rollbacked,
            )
        };

        let branch_ids: Vec<i64> = session.branches().iter().map(|b| b.branch_id).collect();
        let mut deferred = false;

        for branch_id in branch_ids {
            let branch = match session.branch(branch_id) {
                Some(branch) => branch.clone(),
                None => continue,
            };
            match branch.status {
                BranchStatus::PhaseOneFailed => {
                    self.discard_branch(session, &branch)?;
                    continue;
                }
                BranchStatus::PhaseTwoRollbacked => {
                    self.discard_branch(session, &branch)?;
                    continue;
                }
                BranchStatus::StopRetry => {
                    deferred = true;
                    continue;
                }
                _ => {}
            }

            let outcome = self
                .call_rm(
                    RmOp::Rollback,
                    session.xid().clone(),
                    &branch,
                    config.rm_request_timeout_ms,
                )
                .await;
            match outcome {
                BranchOutcome::Done | BranchOutcome::NotFound => {
                    session.change_branch_status(branch_id, BranchStatus::PhaseTwoRollbacked)?;
                    self.discard_branch(session, &branch)?;
                }
                BranchOutcome::Retryable(reason) => {
                    tracing::warn!(
                        xid = %session.xid(),
                        branch_id,
                        %reason,
                        "branch rollback failed, leaving for retry"
                    );
                    session.change_branch_status(
                        branch_id,
                        BranchStatus::PhaseTwoRollbackFailedRetryable,
                    )?;
                    if let Some(updated) = session.branch(branch_id) {
                        self.sessions.persist_branch(session, updated)?;
                    }
                    if session.status() != retrying_status {
                        self.transition(session, retrying_status)?;
                    }
                    return Ok(retrying_status);
                }
                BranchOutcome::Permanent(reason) => {
                    tracing::error!(
                        xid = %session.xid(),
                        branch_id,
                        %reason,
                        "branch rollback failed permanently"
                    );
                    session.change_branch_status(
                        branch_id,
                        BranchStatus::PhaseTwoRollbackFailedUnretryable,
                    )?;
                    if let Some(updated) = session.branch(branch_id) {
                        self.sessions.persist_branch(session, updated)?;
                    }
                    self.end_failed(
                        session,
                        failed_status,
                        config.rollback_failed_unlock_enable,
                    )?;
                    return Ok(failed_status);
                }
            }
        }

        if deferred {
            if session.status() != retrying_status {
                self.transition(session, retrying_status)?;
            }
            return Ok(session.status());
        }

        self.end_success(session, done_status)?;
        Ok(done_status)
    }

    // === Shared helpers ===

    fn parse_xid(&self, s: &str) -> Result<Xid> {
        s.parse()
            .map_err(|_| TransactionError::new(ErrorCode::Unknown, format!("malformed xid: {}", s)))
    }

    async fn current_status(&self, xid: &Xid) -> GlobalStatus {
        match self.sessions.find(xid.transaction_id()) {
            Some(handle) => handle.lock().await.status(),
            None => GlobalStatus::Finished,
        }
    }

    /// Status to report alongside a failure header: the session's state as
    /// of the last successful transition.
    async fn status_for_error(&self, xid_str: &str) -> GlobalStatus {
        match xid_str.parse::<Xid>() {
            Ok(xid) => self.current_status(&xid).await,
            Err(_) => GlobalStatus::Unknown,
        }
    }

    /// Validate, persist, then apply a status transition.
    ///
    /// The durable record is written before the in-memory session moves, so
    /// a store failure leaves both at the last committed transition.
    pub(crate) fn transition(
        &self,
        session: &mut GlobalSession,
        next: GlobalStatus,
    ) -> Result<()> {
        let from = session.status();
        let mut updated = session.clone();
        updated.change_status(next)?;
        self.sessions.persist(&updated)?;
        *session = updated;
        self.sessions.notify_status_change(session, from);
        Ok(())
    }

    /// Finish a session on its success terminal: release locks, drop the
    /// durable record, remove it from the live table.
    pub(crate) fn end_success(
        &self,
        session: &mut GlobalSession,
        terminal: GlobalStatus,
    ) -> Result<()> {
        let from = session.status();
        session.change_status(terminal)?;
        self.sessions.notify_status_change(session, from);
        self.locks.release_xid(session.xid());
        self.sessions.end(session)?;
        tracing::info!(xid = %session.xid(), status = %terminal, "global transaction finished");
        Ok(())
    }

    /// Park a session on its failure terminal. The record is kept for the
    /// operator; locks release only where policy allows.
    pub(crate) fn end_failed(
        &self,
        session: &mut GlobalSession,
        terminal: GlobalStatus,
        release_locks: bool,
    ) -> Result<()> {
        session.deactivate();
        self.transition(session, terminal)?;
        if release_locks {
            self.locks.release_xid(session.xid());
        }
        tracing::error!(
            xid = %session.xid(),
            status = %terminal,
            "global transaction failed; operator intervention required"
        );
        Ok(())
    }

    /// Release a branch's locks and drop it from the session and the store.
    pub(crate) fn discard_branch(
        &self,
        session: &mut GlobalSession,
        branch: &BranchSession,
    ) -> Result<()> {
        if branch.branch_type.holds_row_locks() {
            if let Ok(rows) = parse_lock_key(&branch.lock_key) {
                self.locks.unlock_branch(
                    session.xid(),
                    branch.branch_id,
                    &branch.resource_id,
                    &rows,
                );
            }
        }
        session.remove_branch(branch.branch_id);
        self.sessions.remove_branch_record(session, branch.branch_id)?;
        Ok(())
    }

    /// Dispatch one phase-two call, mapping missing RMs and RPC timeouts to
    /// retryable outcomes.
    pub(crate) async fn call_rm(
        &self,
        op: RmOp,
        xid: Xid,
        branch: &BranchSession,
        timeout_ms: u64,
    ) -> BranchOutcome {
        let resource = match self.resources.get(&branch.resource_id) {
            Some(resource) => resource,
            None => {
                return BranchOutcome::Retryable(format!(
                    "resource {} not registered",
                    branch.resource_id
                ))
            }
        };
        let ctx = BranchContext {
            xid,
            branch_id: branch.branch_id,
            resource_id: branch.resource_id.clone(),
            branch_type: branch.branch_type,
            application_data: branch.application_data.clone(),
        };
        let call = async {
            match op {
                RmOp::Commit => resource.branch_commit(&ctx).await,
                RmOp::Rollback => resource.branch_rollback(&ctx).await,
                RmOp::Delete => resource.branch_delete(&ctx).await,
            }
        };
        match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(outcome) => outcome,
            Err(_) => BranchOutcome::Retryable(format!("rpc timed out after {}ms", timeout_ms)),
        }
    }

    /// Abort the background sweeps.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Convenience used by operator tooling and tests.
    pub async fn status_of(&self, xid: &str) -> ConsoleResult<GlobalStatus> {
        let xid = self
            .parse_xid(xid)
            .map_err(crate::error::CoordinatorError::Transaction)?;
        Ok(self.current_status(&xid).await)
    }
}
