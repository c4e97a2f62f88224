//! The session manager: live session table plus write-through persistence.

use crate::branch::BranchSession;
use crate::global::GlobalSession;
use crate::store::{SessionStore, StoreError};
use concord_common::{ErrorCode, GlobalStatus, Result, TransactionError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Hooks invoked on session lifecycle edges.
///
/// Listeners observe; they cannot veto. The coordinator installs a logging
/// listener and the hooks double as the attachment point for accounting.
pub trait SessionLifecycle: Send + Sync {
    fn on_begin(&self, _session: &GlobalSession) {}
    fn on_status_change(&self, _session: &GlobalSession, _from: GlobalStatus) {}
    fn on_end(&self, _session: &GlobalSession) {}
}

/// A live session behind its per-xid mutex.
///
/// Holding the guard is the critical section "read session, mutate branch
/// list and status, persist": two handlers touching the same xid serialize
/// here while unrelated xids proceed in parallel.
#[derive(Debug)]
pub struct SessionHandle {
    session: Mutex<GlobalSession>,
}

impl SessionHandle {
    fn new(session: GlobalSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Enter the session's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, GlobalSession> {
        self.session.lock().await
    }

    /// Enter the critical section only if nobody holds it.
    ///
    /// Sweeps use this: a held lock means a handler is already driving the
    /// session, so there is nothing for the sweep to do this round.
    pub fn try_lock(
        &self,
    ) -> std::result::Result<MutexGuard<'_, GlobalSession>, tokio::sync::TryLockError> {
        self.session.try_lock()
    }
}

/// Owns every live session and writes mutations through to the store.
pub struct SessionManager {
    sessions: RwLock<HashMap<i64, Arc<SessionHandle>>>,
    store: Arc<dyn SessionStore>,
    listeners: RwLock<Vec<Arc<dyn SessionLifecycle>>>,
}

impl SessionManager {
    /// Create a manager over the given store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Install a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn SessionLifecycle>) {
        self.listeners.write().push(listener);
    }

    /// Admit a freshly begun session: persist it, index it, fire `on_begin`.
    pub fn begin(&self, session: GlobalSession) -> Result<Arc<SessionHandle>> {
        let transaction_id = session.transaction_id();
        if self.sessions.read().contains_key(&transaction_id) {
            // Ids are generator-unique; a collision means the generator broke.
            return Err(TransactionError::should_never_happen(format!(
                "duplicate transaction id {}",
                transaction_id
            )));
        }
        self.store
            .put_global(&session)
            .map_err(write_failed)?;

        let handle = Arc::new(SessionHandle::new(session.clone()));
        self.sessions.write().insert(transaction_id, handle.clone());

        for listener in self.listeners.read().iter() {
            listener.on_begin(&session);
        }
        Ok(handle)
    }

    /// Look up a live session.
    pub fn find(&self, transaction_id: i64) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(&transaction_id).cloned()
    }

    /// Look up a live session, mapping absence to the protocol error.
    pub fn require(&self, transaction_id: i64) -> Result<Arc<SessionHandle>> {
        self.find(transaction_id).ok_or_else(|| {
            TransactionError::new(
                ErrorCode::GlobalTransactionNotExist,
                format!("no global transaction {}", transaction_id),
            )
        })
    }

    /// Snapshot every live handle (sweeps filter under each handle's lock).
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Persist the session's current global record.
    pub fn persist(&self, session: &GlobalSession) -> Result<()> {
        self.store.put_global(session).map_err(write_failed)
    }

    /// Persist one branch record of the session.
    pub fn persist_branch(&self, session: &GlobalSession, branch: &BranchSession) -> Result<()> {
        self.store
            .put_branch(session.transaction_id(), branch)
            .map_err(write_failed)
    }

    /// Drop one branch record of the session.
    pub fn remove_branch_record(&self, session: &GlobalSession, branch_id: i64) -> Result<()> {
        self.store
            .remove_branch(session.transaction_id(), branch_id)
            .map_err(write_failed)
    }

    /// Fire `on_status_change` after a persisted transition.
    pub fn notify_status_change(&self, session: &GlobalSession, from: GlobalStatus) {
        for listener in self.listeners.read().iter() {
            listener.on_status_change(session, from);
        }
    }

    /// End a session's life: remove the durable record, drop it from the
    /// table, fire `on_end`.
    pub fn end(&self, session: &GlobalSession) -> Result<()> {
        self.store
            .remove_global(session.transaction_id())
            .map_err(write_failed)?;
        self.sessions.write().remove(&session.transaction_id());
        for listener in self.listeners.read().iter() {
            listener.on_end(session);
        }
        Ok(())
    }

    /// Rebuild the session table from the store after a restart.
    ///
    /// Returns the restored sessions so the caller can rebuild the lock
    /// registry from their branches before accepting traffic.
    pub fn restore(&self) -> Result<Vec<GlobalSession>> {
        let loaded = self.store.load_all().map_err(|e| {
            TransactionError::new(ErrorCode::FailedStore, format!("session reload failed: {}", e))
        })?;
        let mut sessions = self.sessions.write();
        for session in &loaded {
            sessions.insert(
                session.transaction_id(),
                Arc::new(SessionHandle::new(session.clone())),
            );
        }
        Ok(loaded)
    }
}

fn write_failed(err: StoreError) -> TransactionError {
    TransactionError::new(
        ErrorCode::FailedWriteSession,
        format!("session store write failed: {}", err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use concord_common::{BranchType, Xid};
    use parking_lot::Mutex as PlMutex;

    fn session(id: i64) -> GlobalSession {
        GlobalSession::begin(Xid::new("127.0.0.1:8091", id), "app", "group", "tx", 5000)
    }

    #[derive(Default)]
    struct RecordingListener {
        events: PlMutex<Vec<String>>,
    }

    impl SessionLifecycle for RecordingListener {
        fn on_begin(&self, session: &GlobalSession) {
            self.events.lock().push(format!("begin:{}", session.transaction_id()));
        }
        fn on_status_change(&self, session: &GlobalSession, from: GlobalStatus) {
            self.events
                .lock()
                .push(format!("status:{}:{}->{}", session.transaction_id(), from, session.status()));
        }
        fn on_end(&self, session: &GlobalSession) {
            self.events.lock().push(format!("end:{}", session.transaction_id()));
        }
    }

    #[tokio::test]
    async fn test_begin_find_end() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let listener = Arc::new(RecordingListener::default());
        manager.add_listener(listener.clone());

        manager.begin(session(1)).unwrap();
        let handle = manager.require(1).unwrap();
        let snapshot = handle.lock().await.clone();
        manager.end(&snapshot).unwrap();

        assert!(manager.find(1).is_none());
        assert!(matches!(
            manager.require(1).unwrap_err().code,
            ErrorCode::GlobalTransactionNotExist
        ));
        let events = listener.events.lock();
        assert_eq!(events.as_slice(), ["begin:1", "end:1"]);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        {
            let manager = SessionManager::new(store.clone());
            let handle = manager.begin(session(2)).unwrap();
            let mut guard = handle.lock().await;
            guard
                .add_branch(BranchSession::new(21, "db1", BranchType::At, "orders:1", None, None))
                .unwrap();
            let branch = guard.branches()[0].clone();
            manager.persist_branch(&guard, &branch).unwrap();
            manager.persist(&guard).unwrap();
        }

        let manager = SessionManager::new(store);
        let restored = manager.restore().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].branches().len(), 1);
        assert!(manager.find(2).is_some());
    }

    #[tokio::test]
    async fn test_per_xid_serialization() {
        let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
        manager.begin(session(3)).unwrap();
        let handle = manager.require(3).unwrap();

        let guard = handle.lock().await;
        // A second locker must wait until the guard drops.
        let contender = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut guard = handle.lock().await;
                guard.deactivate();
            })
        };
        tokio::task::yield_now().await;
        assert!(guard.is_active());
        drop(guard);

        contender.await.unwrap();
        assert!(!handle.lock().await.is_active());
    }
}
