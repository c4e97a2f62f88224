//! Status machines for global and branch transactions.
//!
//! A global transaction moves from `Begin` through one of the two-phase
//! driving states into a terminal state, and the coordinator enforces that
//! the sequence is monotonic: terminal states never transition again and
//! nothing ever returns to `Begin`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalStatus {
    /// Not yet determined (e.g. a status query for an unknown xid).
    Unknown,
    /// Accepting branch registrations.
    Begin,
    /// Phase two commit is being driven synchronously.
    Committing,
    /// Commit hit a retryable branch failure; the commit sweep owns it now.
    CommitRetrying,
    /// Phase two rollback is being driven.
    Rollbacking,
    /// Rollback hit a retryable branch failure; the rollback sweep owns it.
    RollbackRetrying,
    /// Rollback triggered by the session exceeding its own timeout.
    TimeoutRollbacking,
    /// Timeout rollback hit a retryable branch failure.
    TimeoutRollbackRetrying,
    /// Commit was deferred to the async sweep (all branches commit lazily).
    AsyncCommitting,
    /// Terminal: every branch committed.
    Committed,
    /// Terminal: commit gave up on an unretryable branch failure or an
    /// exhausted retry budget.
    CommitFailed,
    /// Terminal: every branch rolled back.
    Rollbacked,
    /// Terminal: rollback gave up.
    RollbackFailed,
    /// Terminal: timeout rollback completed.
    TimeoutRollbacked,
    /// Terminal: timeout rollback gave up.
    TimeoutRollbackFailed,
    /// Terminal: the transaction no longer exists on this coordinator.
    Finished,
    /// Operator paused a commit-side retry loop.
    StopCommitOrCommitRetry,
    /// Operator paused a rollback-side retry loop.
    StopRollbackOrRollbackRetry,
    /// Marked for removal; branch cleanup is in flight.
    Deleting,
}

impl GlobalStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GlobalStatus::Committed
                | GlobalStatus::CommitFailed
                | GlobalStatus::Rollbacked
                | GlobalStatus::RollbackFailed
                | GlobalStatus::TimeoutRollbacked
                | GlobalStatus::TimeoutRollbackFailed
                | GlobalStatus::Finished
        )
    }

    /// Statuses owned by a background retry sweep.
    pub fn is_retrying(self) -> bool {
        matches!(
            self,
            GlobalStatus::CommitRetrying
                | GlobalStatus::RollbackRetrying
                | GlobalStatus::TimeoutRollbackRetrying
        )
    }

    /// Statuses paused by the operator; sweeps skip these.
    pub fn is_paused(self) -> bool {
        matches!(
            self,
            GlobalStatus::StopCommitOrCommitRetry | GlobalStatus::StopRollbackOrRollbackRetry
        )
    }

    /// The rollback-side family, timeout variants included.
    pub fn is_rollbacking(self) -> bool {
        matches!(
            self,
            GlobalStatus::Rollbacking
                | GlobalStatus::RollbackRetrying
                | GlobalStatus::TimeoutRollbacking
                | GlobalStatus::TimeoutRollbackRetrying
        )
    }

    /// The commit-side family.
    pub fn is_committing(self) -> bool {
        matches!(
            self,
            GlobalStatus::Committing | GlobalStatus::CommitRetrying | GlobalStatus::AsyncCommitting
        )
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Self-transitions are allowed (idempotent redelivery), terminal states
    /// accept nothing, and `Begin` is unreachable from everywhere.
    pub fn may_transition_to(self, next: GlobalStatus) -> bool {
        if self == next {
            return true;
        }
        if next == GlobalStatus::Deleting {
            // Removal is operator-driven and reaches past the failed
            // terminals; successful terminals are removed without the marker.
            return matches!(
                self,
                GlobalStatus::CommitFailed
                    | GlobalStatus::RollbackFailed
                    | GlobalStatus::TimeoutRollbackFailed
                    | GlobalStatus::CommitRetrying
                    | GlobalStatus::RollbackRetrying
                    | GlobalStatus::TimeoutRollbackRetrying
                    | GlobalStatus::StopCommitOrCommitRetry
                    | GlobalStatus::StopRollbackOrRollbackRetry
                    | GlobalStatus::Unknown
            );
        }
        if self.is_terminal() || next == GlobalStatus::Begin {
            return false;
        }
        use GlobalStatus::*;
        match self {
            Unknown => true,
            Begin => matches!(
                next,
                Committing
                    | AsyncCommitting
                    | Rollbacking
                    | TimeoutRollbacking
                    | Committed
                    | CommitFailed
                    | Rollbacked
                    | RollbackFailed
                    | Finished
            ),
            Committing => matches!(
                next,
                Committed | CommitFailed | CommitRetrying | AsyncCommitting | Rollbacking
            ),
            CommitRetrying => matches!(
                next,
                Committing | Committed | CommitFailed | StopCommitOrCommitRetry
            ),
            AsyncCommitting => matches!(next, Committing | Committed | CommitRetrying | CommitFailed),
            Rollbacking => matches!(next, Rollbacked | RollbackFailed | RollbackRetrying),
            RollbackRetrying => matches!(
                next,
                Rollbacking | Rollbacked | RollbackFailed | StopRollbackOrRollbackRetry
            ),
            TimeoutRollbacking => matches!(
                next,
                TimeoutRollbacked | TimeoutRollbackFailed | TimeoutRollbackRetrying
            ),
            TimeoutRollbackRetrying => matches!(
                next,
                TimeoutRollbacking
                    | TimeoutRollbacked
                    | TimeoutRollbackFailed
                    | StopRollbackOrRollbackRetry
            ),
            StopCommitOrCommitRetry => matches!(next, CommitRetrying | Committing),
            StopRollbackOrRollbackRetry => matches!(
                next,
                RollbackRetrying | Rollbacking | TimeoutRollbackRetrying | TimeoutRollbacking
            ),
            Deleting => matches!(next, Finished),
            _ => false,
        }
    }
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Status of one branch within a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchStatus {
    /// Not yet determined.
    Unknown,
    /// Registered with the coordinator; phase one is running at the RM.
    Registered,
    /// Phase one finished; the branch awaits the global decision.
    PhaseOneDone,
    /// Phase one failed locally at the RM.
    PhaseOneFailed,
    /// Phase one timed out at the RM.
    PhaseOneTimeout,
    /// Phase two commit dispatched, awaiting the RM answer.
    PhaseTwoCommitting,
    /// Phase two commit acknowledged.
    PhaseTwoCommitted,
    /// Phase two commit failed; retry may succeed.
    PhaseTwoCommitFailedRetryable,
    /// Phase two commit failed permanently.
    PhaseTwoCommitFailedUnretryable,
    /// Phase two rollback dispatched, awaiting the RM answer.
    PhaseTwoRollbacking,
    /// Phase two rollback acknowledged.
    PhaseTwoRollbacked,
    /// Phase two rollback failed; retry may succeed.
    PhaseTwoRollbackFailedRetryable,
    /// Phase two rollback failed permanently.
    PhaseTwoRollbackFailedUnretryable,
    /// Operator excluded this branch from retry sweeps.
    StopRetry,
}

impl BranchStatus {
    /// Statuses from which the operator may stop retry.
    pub fn can_stop_retry(self) -> bool {
        matches!(
            self,
            BranchStatus::Registered | BranchStatus::Unknown | BranchStatus::PhaseOneDone
        )
    }

    /// Whether this status is a settled phase-two outcome.
    pub fn is_phase_two_terminal(self) -> bool {
        matches!(
            self,
            BranchStatus::PhaseTwoCommitted
                | BranchStatus::PhaseTwoCommitFailedUnretryable
                | BranchStatus::PhaseTwoRollbacked
                | BranchStatus::PhaseTwoRollbackFailedUnretryable
        )
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Transaction mode of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchType {
    /// Automatic mode: undo-log based, row locks held at the coordinator.
    At,
    /// Try-Confirm-Cancel.
    Tcc,
    /// Saga (state machine driven).
    Saga,
    /// Saga declared through annotations on the participant.
    SagaAnnotation,
    /// XA protocol branches.
    Xa,
}

impl BranchType {
    /// Only AT and XA branches register row locks with the coordinator.
    pub fn holds_row_locks(self) -> bool {
        matches!(self, BranchType::At | BranchType::Xa)
    }

    /// AT branches buffer their phase-two commit; a session made solely of
    /// them is eligible for async commit.
    pub fn supports_async_commit(self) -> bool {
        matches!(self, BranchType::At)
    }

    /// Saga branches have no determinative role the operator could act on.
    pub fn is_saga(self) -> bool {
        matches!(self, BranchType::Saga | BranchType::SagaAnnotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_accept_nothing() {
        for terminal in [
            GlobalStatus::Committed,
            GlobalStatus::Rollbacked,
            GlobalStatus::CommitFailed,
            GlobalStatus::RollbackFailed,
            GlobalStatus::TimeoutRollbacked,
            GlobalStatus::TimeoutRollbackFailed,
            GlobalStatus::Finished,
        ] {
            assert!(!terminal.may_transition_to(GlobalStatus::Begin));
            assert!(!terminal.may_transition_to(GlobalStatus::Committing));
            assert!(!terminal.may_transition_to(GlobalStatus::Rollbacking));
            // Idempotent redelivery of the same terminal status is fine.
            assert!(terminal.may_transition_to(terminal));
        }
    }

    #[test]
    fn test_begin_is_unreachable() {
        assert!(!GlobalStatus::Committing.may_transition_to(GlobalStatus::Begin));
        assert!(!GlobalStatus::CommitRetrying.may_transition_to(GlobalStatus::Begin));
        assert!(!GlobalStatus::Rollbacked.may_transition_to(GlobalStatus::Begin));
    }

    #[test]
    fn test_commit_path() {
        assert!(GlobalStatus::Begin.may_transition_to(GlobalStatus::Committing));
        assert!(GlobalStatus::Committing.may_transition_to(GlobalStatus::Committed));
        assert!(GlobalStatus::Committing.may_transition_to(GlobalStatus::CommitRetrying));
        assert!(GlobalStatus::CommitRetrying.may_transition_to(GlobalStatus::CommitFailed));
        assert!(GlobalStatus::Begin.may_transition_to(GlobalStatus::AsyncCommitting));
    }

    #[test]
    fn test_timeout_path_is_distinct() {
        assert!(GlobalStatus::Begin.may_transition_to(GlobalStatus::TimeoutRollbacking));
        assert!(GlobalStatus::TimeoutRollbacking.may_transition_to(GlobalStatus::TimeoutRollbacked));
        assert!(!GlobalStatus::TimeoutRollbacking.may_transition_to(GlobalStatus::Rollbacked));
    }

    #[test]
    fn test_operator_pause_resume() {
        assert!(
            GlobalStatus::CommitRetrying.may_transition_to(GlobalStatus::StopCommitOrCommitRetry)
        );
        assert!(
            GlobalStatus::StopCommitOrCommitRetry.may_transition_to(GlobalStatus::CommitRetrying)
        );
        assert!(GlobalStatus::RollbackRetrying
            .may_transition_to(GlobalStatus::StopRollbackOrRollbackRetry));
        assert!(!GlobalStatus::Begin.may_transition_to(GlobalStatus::StopCommitOrCommitRetry));
    }

    #[test]
    fn test_branch_stop_retry_guard() {
        assert!(BranchStatus::Registered.can_stop_retry());
        assert!(BranchStatus::PhaseOneDone.can_stop_retry());
        assert!(!BranchStatus::PhaseTwoCommitted.can_stop_retry());
        assert!(!BranchStatus::StopRetry.can_stop_retry());
    }

    #[test]
    fn test_branch_type_capabilities() {
        assert!(BranchType::At.holds_row_locks());
        assert!(BranchType::Xa.holds_row_locks());
        assert!(!BranchType::Tcc.holds_row_locks());
        assert!(BranchType::At.supports_async_commit());
        assert!(!BranchType::Xa.supports_async_commit());
        assert!(BranchType::SagaAnnotation.is_saga());
    }
}
