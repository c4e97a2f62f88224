//! Crash recovery: sessions and locks rebuilt from the file store.

mod common;

use common::*;
use concord_common::{BranchType, ErrorCode, GlobalStatus};
use concord_session::FileStore;
use concord_testkit::{MockOp, Script};
use std::sync::Arc;

#[tokio::test]
async fn test_restore_rebuilds_sessions_and_locks() {
    let dir = tempfile::tempdir().unwrap();
    let xid;
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let (coordinator, _, _) = coordinator_with(store, test_config());
        xid = begin(&coordinator, 60_000).await;
        register(&coordinator, &xid, "db1", BranchType::At, "orders:1,2").await;
        // Coordinator "crashes" here: no commit, no rollback.
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (coordinator, _, _) = coordinator_with(store, test_config());
    let restored = coordinator.restore().unwrap();
    assert_eq!(restored, 1);
    assert_eq!(
        coordinator.status_of(&xid).await.unwrap(),
        GlobalStatus::Begin
    );
    assert_eq!(coordinator.locks().locked_rows(), 2);

    // The recovered transaction still owns its rows.
    let other = begin(&coordinator, 5_000).await;
    let refused = try_register(&coordinator, &other, "db1", BranchType::At, "orders:1").await;
    assert_eq!(refused.header.error, Some(ErrorCode::LockKeyConflict));

    // Rolling the survivor back frees them.
    let response = rollback(&coordinator, &xid).await;
    assert_eq!(response.global_status, GlobalStatus::Rollbacked);
    let retried = try_register(&coordinator, &other, "db1", BranchType::At, "orders:1").await;
    assert!(retried.header.is_success());
}

#[tokio::test]
async fn test_restore_resumes_commit_retry() {
    let dir = tempfile::tempdir().unwrap();
    let xid;
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let (coordinator, _, db2) = coordinator_with(store, test_config());
        xid = begin(&coordinator, 60_000).await;
        register(&coordinator, &xid, "db2", BranchType::Tcc, "").await;
        db2.script(
            MockOp::Commit,
            Script::AlwaysRetryable("rm down".to_string()),
        );
        let response = commit(&coordinator, &xid).await;
        assert_eq!(response.global_status, GlobalStatus::CommitRetrying);
        // Crash while parked in CommitRetrying.
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (coordinator, _, db2) = coordinator_with(store, test_config());
    coordinator.restore().unwrap();
    assert_eq!(
        coordinator.status_of(&xid).await.unwrap(),
        GlobalStatus::CommitRetrying
    );

    // The RM is healthy after the restart; the sweep finishes the commit.
    coordinator.sweep_commit_retry().await;
    assert_eq!(
        coordinator.status_of(&xid).await.unwrap(),
        GlobalStatus::Finished
    );
    assert_eq!(db2.calls_of(MockOp::Commit).len(), 1);
}

#[tokio::test]
async fn test_restore_resumes_async_commit() {
    let dir = tempfile::tempdir().unwrap();
    let xid;
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let (coordinator, _, _) = coordinator_with(store, test_config());
        xid = begin(&coordinator, 60_000).await;
        register(&coordinator, &xid, "db1", BranchType::At, "orders:5").await;
        let response = commit(&coordinator, &xid).await;
        // Client was told Committed; phase two had not run yet.
        assert_eq!(response.global_status, GlobalStatus::Committed);
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (coordinator, db1, _) = coordinator_with(store, test_config());
    coordinator.restore().unwrap();
    assert_eq!(
        coordinator.status_of(&xid).await.unwrap(),
        GlobalStatus::AsyncCommitting
    );

    coordinator.sweep_async_commit().await;
    assert_eq!(
        coordinator.status_of(&xid).await.unwrap(),
        GlobalStatus::Finished
    );
    assert_eq!(db1.calls_of(MockOp::Commit).len(), 1);
    assert_eq!(coordinator.locks().locked_rows(), 0);
}

#[tokio::test]
async fn test_restored_branch_statuses_steer_phase_two() {
    let dir = tempfile::tempdir().unwrap();
    let xid;
    let failed_branch;
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let (coordinator, _, _) = coordinator_with(store, test_config());
        xid = begin(&coordinator, 60_000).await;
        failed_branch = register(&coordinator, &xid, "db1", BranchType::At, "orders:1").await;
        register(&coordinator, &xid, "db2", BranchType::At, "stock:4").await;
        let report = coordinator
            .branch_report(&concord_protocol::BranchReportRequest {
                xid: xid.clone(),
                branch_id: failed_branch,
                branch_status: concord_common::BranchStatus::PhaseOneFailed,
                application_data: None,
            })
            .await;
        assert!(report.header.is_success());
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (coordinator, db1, db2) = coordinator_with(store, test_config());
    coordinator.restore().unwrap();

    let response = rollback(&coordinator, &xid).await;
    assert_eq!(response.global_status, GlobalStatus::Rollbacked);
    // The branch that failed phase one is discarded without an RM call;
    // the healthy one is compensated.
    assert!(db1.calls_of(MockOp::Rollback).is_empty());
    assert_eq!(db2.calls_of(MockOp::Rollback).len(), 1);
}
