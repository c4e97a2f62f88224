//! Scriptable mock resource managers.
//!
//! A [`MockResource`] stands in for a real resource manager in tests: each
//! operation follows a script (always succeed, fail N times then succeed,
//! fail permanently, ...) and every delivery is recorded so tests can
//! assert ordering and idempotency.

use async_trait::async_trait;
use concord_common::Xid;
use concord_coordinator::{BranchContext, BranchOutcome, BranchResource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Which branch operation a record or script refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Commit,
    Rollback,
    Delete,
}

/// One delivery observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: MockOp,
    pub xid: Xid,
    pub branch_id: i64,
}

/// Behavior of one operation.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed every time.
    Done,
    /// Answer `NotFound` every time.
    NotFound,
    /// Fail retryably every time.
    AlwaysRetryable(String),
    /// Fail permanently every time.
    AlwaysPermanent(String),
    /// Fail retryably `n` times, then succeed.
    FailRetryableTimes(u32, String),
}

struct MockState {
    scripts: HashMap<MockOp, Script>,
    overrides: HashMap<(String, MockOp), Script>,
    remaining_failures: HashMap<MockOp, u32>,
    calls: Vec<CallRecord>,
}

/// A scriptable in-process resource manager.
pub struct MockResource {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl Default for MockResource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResource {
    /// A resource whose every operation succeeds.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                scripts: HashMap::new(),
                overrides: HashMap::new(),
                remaining_failures: HashMap::new(),
                calls: Vec::new(),
            }),
            latency: None,
        }
    }

    /// A resource that sleeps before answering (for RPC-timeout tests).
    pub fn with_latency(latency: Duration) -> Self {
        let mut resource = Self::new();
        resource.latency = Some(latency);
        resource
    }

    /// Script one operation's behavior for every xid.
    pub fn script(&self, op: MockOp, script: Script) {
        let mut state = self.state.lock();
        if let Script::FailRetryableTimes(n, _) = &script {
            state.remaining_failures.insert(op, *n);
        }
        state.scripts.insert(op, script);
    }

    /// Script one operation's behavior for a single xid, overriding the
    /// general script.
    pub fn script_for_xid(&self, xid: &Xid, op: MockOp, script: Script) {
        self.state
            .lock()
            .overrides
            .insert((xid.to_string(), op), script);
    }

    /// Every delivery seen so far, in arrival order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Deliveries of one operation.
    pub fn calls_of(&self, op: MockOp) -> Vec<CallRecord> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    async fn respond(&self, op: MockOp, ctx: &BranchContext) -> BranchOutcome {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(CallRecord {
            op,
            xid: ctx.xid.clone(),
            branch_id: ctx.branch_id,
        });

        let script = state
            .overrides
            .get(&(ctx.xid.to_string(), op))
            .or_else(|| state.scripts.get(&op))
            .cloned()
            .unwrap_or(Script::Done);

        match script {
            Script::Done => BranchOutcome::Done,
            Script::NotFound => BranchOutcome::NotFound,
            Script::AlwaysRetryable(reason) => BranchOutcome::Retryable(reason),
            Script::AlwaysPermanent(reason) => BranchOutcome::Permanent(reason),
            Script::FailRetryableTimes(_, reason) => {
                let remaining = state.remaining_failures.entry(op).or_insert(0);
                if *remaining > 0 {
                    *remaining -= 1;
                    BranchOutcome::Retryable(reason)
                } else {
                    BranchOutcome::Done
                }
            }
        }
    }
}

#[async_trait]
impl BranchResource for MockResource {
    async fn branch_commit(&self, ctx: &BranchContext) -> BranchOutcome {
        self.respond(MockOp::Commit, ctx).await
    }

    async fn branch_rollback(&self, ctx: &BranchContext) -> BranchOutcome {
        self.respond(MockOp::Rollback, ctx).await
    }

    async fn branch_delete(&self, ctx: &BranchContext) -> BranchOutcome {
        self.respond(MockOp::Delete, ctx).await
    }
}
