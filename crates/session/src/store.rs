//! Durable session stores.
//!
//! The store records every session mutation before the coordinator takes an
//! irreversible action, so a restarted coordinator resumes from the last
//! successfully persisted transition. Global and branch records are written
//! separately; branch keys embed the owning transaction id followed by the
//! branch id, so a prefix scan yields a session's branches in registration
//! order (branch ids are monotonic).

use crate::branch::BranchSession;
use crate::global::GlobalSession;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;

/// Failure inside a session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] fjall::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Durable record of session state; pluggable persistence seam.
pub trait SessionStore: Send + Sync {
    /// Write (or overwrite) a global session's own record.
    fn put_global(&self, session: &GlobalSession) -> Result<(), StoreError>;

    /// Remove a global session and all of its branch records.
    fn remove_global(&self, transaction_id: i64) -> Result<(), StoreError>;

    /// Write (or overwrite) one branch record.
    fn put_branch(&self, transaction_id: i64, branch: &BranchSession) -> Result<(), StoreError>;

    /// Remove one branch record.
    fn remove_branch(&self, transaction_id: i64, branch_id: i64) -> Result<(), StoreError>;

    /// Load every persisted session with its branches attached.
    fn load_all(&self) -> Result<Vec<GlobalSession>, StoreError>;
}

/// Store without durability; restarts lose everything.
#[derive(Debug, Default)]
pub struct MemoryStore;

impl MemoryStore {
    pub fn new() -> Self {
        Self
    }
}

impl SessionStore for MemoryStore {
    fn put_global(&self, _session: &GlobalSession) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove_global(&self, _transaction_id: i64) -> Result<(), StoreError> {
        Ok(())
    }

    fn put_branch(&self, _transaction_id: i64, _branch: &BranchSession) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove_branch(&self, _transaction_id: i64, _branch_id: i64) -> Result<(), StoreError> {
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<GlobalSession>, StoreError> {
        Ok(Vec::new())
    }
}

/// File-backed store on a fjall keyspace, synced on every write.
pub struct FileStore {
    keyspace: Keyspace,
    globals: PartitionHandle,
    branches: PartitionHandle,
}

impl FileStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let keyspace = fjall::Config::new(path).open()?;
        let globals = keyspace.open_partition("globals", PartitionCreateOptions::default())?;
        let branches = keyspace.open_partition("branches", PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            globals,
            branches,
        })
    }

    fn global_key(transaction_id: i64) -> [u8; 8] {
        (transaction_id as u64).to_be_bytes()
    }

    fn branch_key(transaction_id: i64, branch_id: i64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&(transaction_id as u64).to_be_bytes());
        key[8..].copy_from_slice(&(branch_id as u64).to_be_bytes());
        key
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn put_global(&self, session: &GlobalSession) -> Result<(), StoreError> {
        // Branches are persisted individually; the global record stays flat.
        let mut record = session.clone();
        record.branches.clear();
        let bytes = bincode::serialize(&record)?;
        self.globals
            .insert(Self::global_key(session.transaction_id()), bytes)?;
        self.sync()
    }

    fn remove_global(&self, transaction_id: i64) -> Result<(), StoreError> {
        self.globals.remove(Self::global_key(transaction_id))?;
        let prefix = Self::global_key(transaction_id);
        let keys: Vec<_> = self
            .branches
            .prefix(prefix)
            .map(|kv| kv.map(|(k, _)| k))
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.branches.remove(key)?;
        }
        self.sync()
    }

    fn put_branch(&self, transaction_id: i64, branch: &BranchSession) -> Result<(), StoreError> {
        let bytes = bincode::serialize(branch)?;
        self.branches
            .insert(Self::branch_key(transaction_id, branch.branch_id), bytes)?;
        self.sync()
    }

    fn remove_branch(&self, transaction_id: i64, branch_id: i64) -> Result<(), StoreError> {
        self.branches
            .remove(Self::branch_key(transaction_id, branch_id))?;
        self.sync()
    }

    fn load_all(&self) -> Result<Vec<GlobalSession>, StoreError> {
        let mut sessions = Vec::new();
        for kv in self.globals.iter() {
            let (_, value) = kv?;
            let session: GlobalSession = bincode::deserialize(&value)?;
            sessions.push(session);
        }
        for session in &mut sessions {
            let prefix = Self::global_key(session.transaction_id());
            for kv in self.branches.prefix(prefix) {
                let (_, value) = kv?;
                let branch: BranchSession = bincode::deserialize(&value)?;
                session.branches.push(branch);
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_common::{BranchStatus, BranchType, GlobalStatus, Xid};

    fn session(id: i64) -> GlobalSession {
        GlobalSession::begin(Xid::new("127.0.0.1:8091", id), "app", "group", "tx", 5000)
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut s = session(7);
        s.add_branch(BranchSession::new(71, "db1", BranchType::At, "orders:1", None, None))
            .unwrap();
        s.add_branch(BranchSession::new(72, "db2", BranchType::Tcc, "", None, None))
            .unwrap();

        store.put_global(&s).unwrap();
        for branch in s.branches() {
            store.put_branch(s.transaction_id(), branch).unwrap();
        }

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].xid(), s.xid());
        assert_eq!(loaded[0].branches().len(), 2);
        // Registration order survives via key ordering.
        assert_eq!(loaded[0].branches()[0].branch_id, 71);
        assert_eq!(loaded[0].branches()[1].branch_id, 72);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let mut s = session(9);
            s.change_status(GlobalStatus::Committing).unwrap();
            s.change_status(GlobalStatus::CommitRetrying).unwrap();
            store.put_global(&s).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status(), GlobalStatus::CommitRetrying);
    }

    #[test]
    fn test_remove_global_drops_branches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut s = session(5);
        s.add_branch(BranchSession::new(51, "db1", BranchType::At, "orders:1", None, None))
            .unwrap();
        store.put_global(&s).unwrap();
        store.put_branch(s.transaction_id(), &s.branches()[0]).unwrap();

        store.remove_global(s.transaction_id()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_branch_update_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut s = session(3);
        s.add_branch(BranchSession::new(31, "db1", BranchType::At, "orders:1", None, None))
            .unwrap();
        store.put_global(&s).unwrap();
        store.put_branch(s.transaction_id(), &s.branches()[0]).unwrap();

        s.change_branch_status(31, BranchStatus::PhaseOneDone).unwrap();
        store.put_branch(s.transaction_id(), &s.branches()[0]).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].branches()[0].status, BranchStatus::PhaseOneDone);
    }
}
