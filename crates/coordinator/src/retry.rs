//! Background sweeps that re-drive stuck sessions.
//!
//! Four independent loops: commit retry, async commit, rollback retry, and
//! session timeout. Each sweep re-invokes the same drive paths as the
//! synchronous handlers, so there is no second copy of the phase-two logic.
//! A sweep skips any session whose per-xid mutex is held — a handler is
//! already driving it — and any session paused by the operator.

use crate::coordinator::Coordinator;
use concord_common::{millis_now, Config, GlobalStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The four sweep flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepKind {
    CommitRetry,
    AsyncCommit,
    RollbackRetry,
    TimeoutCheck,
}

impl SweepKind {
    fn period_ms(self, config: &Config) -> u64 {
        match self {
            SweepKind::CommitRetry => config.committing_retry_period_ms,
            SweepKind::AsyncCommit => config.async_committing_retry_period_ms,
            SweepKind::RollbackRetry => config.rollbacking_retry_period_ms,
            SweepKind::TimeoutCheck => config.timeout_retry_period_ms,
        }
    }
}

impl Coordinator {
    /// Start the background sweeps. Idempotent.
    pub fn start(coordinator: &Arc<Coordinator>) {
        let mut tasks = coordinator.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        for kind in [
            SweepKind::CommitRetry,
            SweepKind::AsyncCommit,
            SweepKind::RollbackRetry,
            SweepKind::TimeoutCheck,
        ] {
            tasks.push(Self::spawn_sweep(coordinator, kind));
        }
    }

    fn spawn_sweep(coordinator: &Arc<Coordinator>, kind: SweepKind) -> JoinHandle<()> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            loop {
                // Period is re-read every turn so hot reloads take effect.
                let period = kind.period_ms(&coordinator.config().get()).max(1);
                tokio::time::sleep(Duration::from_millis(period)).await;
                coordinator.run_sweep(kind).await;
            }
        })
    }

    pub(crate) async fn run_sweep(&self, kind: SweepKind) {
        match kind {
            SweepKind::CommitRetry => self.sweep_commit_retry().await,
            SweepKind::AsyncCommit => self.sweep_async_commit().await,
            SweepKind::RollbackRetry => self.sweep_rollback_retry().await,
            SweepKind::TimeoutCheck => self.sweep_timeout_check().await,
        }
    }

    /// Re-drive sessions parked in `CommitRetrying` (plus `Committing`
    /// survivors of a restart), bounded by the commit retry budget.
    pub async fn sweep_commit_retry(&self) {
        let config = self.config().get();
        for handle in self.sessions().snapshot() {
            let mut session = match handle.try_lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };
            if !matches!(
                session.status(),
                GlobalStatus::CommitRetrying | GlobalStatus::Committing
            ) {
                continue;
            }
            let now = millis_now();
            if !session.retry_eligible(now, config.committing_retry_period_ms) {
                continue;
            }
            session.mark_retry(now);
            if session.flag_if_dead(config.retry_dead_threshold_ms, now) {
                tracing::error!(
                    xid = %session.xid(),
                    retries = session.retry_count(),
                    "commit retried past dead threshold; operator attention required"
                );
            }

            match self.drive_commit(&mut session).await {
                Ok(status) if status == GlobalStatus::CommitRetrying => {
                    if session.retry_exhausted(
                        config.commit_retry_count,
                        config.max_commit_retry_timeout_ms,
                        now,
                    ) {
                        if let Err(err) =
                            self.end_failed(&mut session, GlobalStatus::CommitFailed, true)
                        {
                            tracing::error!(
                                xid = %session.xid(),
                                error = %err,
                                "failed to finalize exhausted commit retry"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(xid = %session.xid(), error = %err, "commit retry failed");
                }
            }
        }
    }

    /// Drive phase two for sessions whose commit was buffered.
    ///
    /// No budget here: a retryable branch failure moves the session to
    /// `CommitRetrying`, whose sweep owns the budget.
    pub async fn sweep_async_commit(&self) {
        let config = self.config().get();
        for handle in self.sessions().snapshot() {
            let mut session = match handle.try_lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };
            if session.status() != GlobalStatus::AsyncCommitting {
                continue;
            }
            let now = millis_now();
            if !session.retry_eligible(now, config.async_committing_retry_period_ms) {
                continue;
            }
            session.mark_retry(now);

            if let Err(err) = self.drive_commit(&mut session).await {
                tracing::error!(xid = %session.xid(), error = %err, "async commit failed");
            }
        }
    }

    /// Re-drive rollback-side sessions, bounded by the rollback budget.
    pub async fn sweep_rollback_retry(&self) {
        let config = self.config().get();
        for handle in self.sessions().snapshot() {
            let mut session = match handle.try_lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };
            if !session.status().is_rollbacking() {
                continue;
            }
            let now = millis_now();
            if !session.retry_eligible(now, config.rollbacking_retry_period_ms) {
                continue;
            }
            session.mark_retry(now);
            if session.flag_if_dead(config.retry_dead_threshold_ms, now) {
                tracing::error!(
                    xid = %session.xid(),
                    retries = session.retry_count(),
                    "rollback retried past dead threshold; operator attention required"
                );
            }

            match self.drive_rollback(&mut session).await {
                Ok(status) if status.is_rollbacking() => {
                    if session.retry_exhausted(
                        config.rollback_retry_count,
                        config.max_rollback_retry_timeout_ms,
                        now,
                    ) {
                        let failed = if matches!(
                            session.status(),
                            GlobalStatus::TimeoutRollbacking
                                | GlobalStatus::TimeoutRollbackRetrying
                        ) {
                            GlobalStatus::TimeoutRollbackFailed
                        } else {
                            GlobalStatus::RollbackFailed
                        };
                        if let Err(err) = self.end_failed(
                            &mut session,
                            failed,
                            config.rollback_failed_unlock_enable,
                        ) {
                            tracing::error!(
                                xid = %session.xid(),
                                error = %err,
                                "failed to finalize exhausted rollback retry"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(xid = %session.xid(), error = %err, "rollback retry failed");
                }
            }
        }
    }

    /// Move `Begin` sessions past their declared timeout onto the timeout
    /// rollback path; the rollback sweep picks them up from there.
    pub async fn sweep_timeout_check(&self) {
        for handle in self.sessions().snapshot() {
            let mut session = match handle.try_lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };
            let now = millis_now();
            if !session.is_timed_out(now) {
                continue;
            }
            session.deactivate();
            match self.transition(&mut session, GlobalStatus::TimeoutRollbacking) {
                Ok(()) => {
                    tracing::info!(
                        xid = %session.xid(),
                        timeout_ms = session.timeout_ms(),
                        "global transaction timed out; rollback scheduled"
                    );
                }
                Err(err) => {
                    tracing::error!(xid = %session.xid(), error = %err, "timeout transition failed");
                }
            }
        }
    }
}
