#![allow(dead_code)]

//! Shared setup for coordinator integration tests.

use concord_common::{BranchType, Config, ConfigHandle};
use concord_coordinator::{Coordinator, ResourceRegistry};
use concord_lock::LockRegistry;
use concord_protocol::{
    BranchRegisterRequest, GlobalBeginRequest, GlobalCommitRequest, GlobalRollbackRequest,
};
use concord_session::{MemoryStore, SessionManager, SessionStore};
use concord_testkit::MockResource;
use std::sync::Arc;

/// Config with no sweep eligibility window, so tests can call the sweep
/// bodies back to back instead of sleeping on timers.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.committing_retry_period_ms = 0;
    config.async_committing_retry_period_ms = 0;
    config.rollbacking_retry_period_ms = 0;
    config.timeout_retry_period_ms = 0;
    config.rm_request_timeout_ms = 1_000;
    config
}

/// A coordinator over the given store with mock RMs on `db1` and `db2`.
pub fn coordinator_with(
    store: Arc<dyn SessionStore>,
    config: Config,
) -> (Arc<Coordinator>, Arc<MockResource>, Arc<MockResource>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let sessions = Arc::new(SessionManager::new(store));
    let locks = Arc::new(LockRegistry::new());
    let resources = Arc::new(ResourceRegistry::new());
    let db1 = Arc::new(MockResource::new());
    let db2 = Arc::new(MockResource::new());
    resources.register("db1", db1.clone());
    resources.register("db2", db2.clone());

    let coordinator = Coordinator::new(
        "127.0.0.1:8091",
        1,
        ConfigHandle::new(config),
        sessions,
        locks,
        resources,
    );
    (coordinator, db1, db2)
}

pub fn new_coordinator() -> (Arc<Coordinator>, Arc<MockResource>, Arc<MockResource>) {
    coordinator_with(Arc::new(MemoryStore::new()), test_config())
}

/// Begin a transaction and return its xid.
pub async fn begin(coordinator: &Coordinator, timeout_ms: u32) -> String {
    let response = coordinator
        .begin(&GlobalBeginRequest {
            application_id: "test-app".to_string(),
            transaction_service_group: "default_tx_group".to_string(),
            transaction_name: "it".to_string(),
            timeout_ms,
        })
        .await;
    assert!(response.header.is_success(), "begin failed: {:?}", response);
    response.xid.expect("xid on successful begin")
}

/// Register a branch and return its id.
pub async fn register(
    coordinator: &Coordinator,
    xid: &str,
    resource_id: &str,
    branch_type: BranchType,
    lock_key: &str,
) -> i64 {
    let response = try_register(coordinator, xid, resource_id, branch_type, lock_key).await;
    assert!(
        response.header.is_success(),
        "register failed: {:?}",
        response
    );
    response.branch_id.expect("branch id on successful register")
}

/// Register a branch, returning the raw response.
pub async fn try_register(
    coordinator: &Coordinator,
    xid: &str,
    resource_id: &str,
    branch_type: BranchType,
    lock_key: &str,
) -> concord_protocol::BranchRegisterResponse {
    coordinator
        .branch_register(&BranchRegisterRequest {
            xid: xid.to_string(),
            resource_id: resource_id.to_string(),
            branch_type,
            lock_key: lock_key.to_string(),
            client_id: Some("client-1".to_string()),
            application_data: None,
        })
        .await
}

pub async fn commit(
    coordinator: &Coordinator,
    xid: &str,
) -> concord_protocol::GlobalCommitResponse {
    coordinator
        .commit(&GlobalCommitRequest {
            xid: xid.to_string(),
        })
        .await
}

pub async fn rollback(
    coordinator: &Coordinator,
    xid: &str,
) -> concord_protocol::GlobalRollbackResponse {
    coordinator
        .rollback(&GlobalRollbackRequest {
            xid: xid.to_string(),
        })
        .await
}
