//! Lock-key wire format.
//!
//! A branch encodes its row locks as `table1:pk1,pk2;table2:pk3` — tables
//! separated by `;`, each naming its primary-key values after a `:`. The
//! resource id arrives alongside the lock key and scopes every row in it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One lockable row: a table name plus a primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub table: String,
    pub pk: String,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.pk)
    }
}

/// Error parsing a lock-key string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid lock key: {0}")]
pub struct LockKeyParseError(pub String);

/// Parse a lock-key string into its row keys.
///
/// An empty string is a valid empty batch (the branch holds no locks).
pub fn parse_lock_key(lock_key: &str) -> Result<Vec<RowKey>, LockKeyParseError> {
    let lock_key = lock_key.trim();
    if lock_key.is_empty() {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for table_part in lock_key.split(';') {
        if table_part.is_empty() {
            continue;
        }
        let (table, pks) = table_part
            .split_once(':')
            .ok_or_else(|| LockKeyParseError(lock_key.to_string()))?;
        if table.is_empty() || pks.is_empty() {
            return Err(LockKeyParseError(lock_key.to_string()));
        }
        for pk in pks.split(',') {
            if pk.is_empty() {
                return Err(LockKeyParseError(lock_key.to_string()));
            }
            rows.push(RowKey {
                table: table.to_string(),
                pk: pk.to_string(),
            });
        }
    }
    Ok(rows)
}
