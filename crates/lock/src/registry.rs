//! The lock registry.

use crate::key::RowKey;
use concord_common::Xid;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The transaction and branch currently holding a row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockHolder {
    xid: Xid,
    branch_id: i64,
}

/// A requested row is held by a different global transaction.
///
/// This is a retryable condition for the requesting client: the holder will
/// release the row when it commits or rolls back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("lock on {resource_id}/{row} held by {holder_xid}")]
pub struct LockConflict {
    pub resource_id: String,
    pub row: RowKey,
    pub holder_xid: Xid,
}

/// Tracks which global transaction holds which row locks.
///
/// Rows are sharded by resource id: a branch's whole batch lives in one
/// shard, so batch acquisition is atomic under the shard mutex while
/// unrelated resources never contend with each other.
#[derive(Default)]
pub struct LockRegistry {
    shards: DashMap<String, Mutex<HashMap<RowKey, LockHolder>>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every row in the batch for `xid`, or nothing.
    ///
    /// Re-entrant: rows already held by `xid` (by any of its branches) are
    /// skipped. On conflict no row from this call is retained and the
    /// conflicting row and holder are reported.
    pub fn try_lock(
        &self,
        xid: &Xid,
        branch_id: i64,
        resource_id: &str,
        rows: &[RowKey],
    ) -> Result<(), LockConflict> {
        if rows.is_empty() {
            return Ok(());
        }
        let shard = self
            .shards
            .entry(resource_id.to_string())
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut table = shard.lock();

        for row in rows {
            if let Some(holder) = table.get(row) {
                if holder.xid != *xid {
                    return Err(LockConflict {
                        resource_id: resource_id.to_string(),
                        row: row.clone(),
                        holder_xid: holder.xid.clone(),
                    });
                }
            }
        }
        for row in rows {
            table.entry(row.clone()).or_insert_with(|| LockHolder {
                xid: xid.clone(),
                branch_id,
            });
        }
        Ok(())
    }

    /// Whether the batch could be acquired by `xid` right now.
    pub fn is_lockable(&self, xid: &Xid, resource_id: &str, rows: &[RowKey]) -> bool {
        if rows.is_empty() {
            return true;
        }
        match self.shards.get(resource_id) {
            None => true,
            Some(shard) => {
                let table = shard.lock();
                rows.iter().all(|row| {
                    table
                        .get(row)
                        .map(|holder| holder.xid == *xid)
                        .unwrap_or(true)
                })
            }
        }
    }

    /// Release the rows a single branch acquired.
    ///
    /// Rows a re-registering branch shares with an earlier branch of the
    /// same xid stay with the earlier branch.
    pub fn unlock_branch(&self, xid: &Xid, branch_id: i64, resource_id: &str, rows: &[RowKey]) {
        if rows.is_empty() {
            return;
        }
        if let Some(shard) = self.shards.get(resource_id) {
            let mut table = shard.lock();
            for row in rows {
                if let Some(holder) = table.get(row) {
                    if holder.xid == *xid && holder.branch_id == branch_id {
                        table.remove(row);
                    }
                }
            }
        }
    }

    /// Release every row held by `xid` across all resources.
    pub fn release_xid(&self, xid: &Xid) {
        for shard in self.shards.iter() {
            let mut table = shard.lock();
            table.retain(|_, holder| holder.xid != *xid);
        }
    }

    /// Rebuild the registry from persisted branch records at startup.
    ///
    /// Must complete before the coordinator accepts traffic, otherwise rows
    /// still owned by recovering transactions would look unlocked.
    pub fn reload<'a>(
        &self,
        branches: impl IntoIterator<Item = (&'a Xid, i64, &'a str, &'a [RowKey])>,
    ) {
        for (xid, branch_id, resource_id, rows) in branches {
            // Records were conflict-free when persisted, so this cannot fail.
            let _ = self.try_lock(xid, branch_id, resource_id, rows);
        }
    }

    /// Number of rows currently locked, across all resources.
    pub fn locked_rows(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// The xid holding a row, if any.
    pub fn holder_of(&self, resource_id: &str, row: &RowKey) -> Option<Xid> {
        self.shards
            .get(resource_id)
            .and_then(|shard| shard.lock().get(row).map(|h| h.xid.clone()))
    }
}
