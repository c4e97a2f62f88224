//! Resource manager registration and branch dispatch.
//!
//! A resource manager participates by implementing [`BranchResource`] and
//! registering itself under its resource id at startup. Outcomes are
//! explicit values, not exceptions: the coordinator matches on them to
//! steer the session state machine.

use async_trait::async_trait;
use concord_common::{BranchType, Xid};
use dashmap::DashMap;
use std::sync::Arc;

/// Everything a resource manager needs to act on one branch.
#[derive(Debug, Clone)]
pub struct BranchContext {
    pub xid: Xid,
    pub branch_id: i64,
    pub resource_id: String,
    pub branch_type: BranchType,
    pub application_data: Option<String>,
}

/// Result of a phase-two (or delete) call against a resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    /// The operation took effect (or already had — redelivery is a no-op).
    Done,
    /// Transient failure; a later retry may succeed.
    Retryable(String),
    /// The resource is in a state retry cannot fix; operator required.
    Permanent(String),
    /// The resource manager no longer knows the branch.
    NotFound,
}

impl BranchOutcome {
    /// Whether this outcome settles the branch successfully.
    ///
    /// `NotFound` counts: the RM already finished and forgot the branch, so
    /// a redelivered request has nothing left to do.
    pub fn is_settled(&self) -> bool {
        matches!(self, BranchOutcome::Done | BranchOutcome::NotFound)
    }
}

/// Capability interface a participating resource implements.
#[async_trait]
pub trait BranchResource: Send + Sync {
    /// Apply the branch's phase-two commit.
    async fn branch_commit(&self, ctx: &BranchContext) -> BranchOutcome;

    /// Apply the branch's phase-two rollback (compensation).
    async fn branch_rollback(&self, ctx: &BranchContext) -> BranchOutcome;

    /// Erase the branch's compensating/undo state.
    async fn branch_delete(&self, ctx: &BranchContext) -> BranchOutcome;
}

/// Registry of live resource managers, keyed by resource id.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: DashMap<String, Arc<dyn BranchResource>>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the resource manager for a resource id.
    pub fn register(&self, resource_id: impl Into<String>, resource: Arc<dyn BranchResource>) {
        self.resources.insert(resource_id.into(), resource);
    }

    /// Remove a resource manager (e.g. on disconnect).
    pub fn deregister(&self, resource_id: &str) {
        self.resources.remove(resource_id);
    }

    /// Look up the resource manager for a resource id.
    pub fn get(&self, resource_id: &str) -> Option<Arc<dyn BranchResource>> {
        self.resources.get(resource_id).map(|r| r.value().clone())
    }
}
