//! Row-lock registry for the Concord transaction coordinator.
//!
//! AT and XA branches declare the rows they intend to modify when they
//! register; the registry grants each row to at most one global transaction
//! at a time. Acquisition is non-blocking and all-or-nothing, which is what
//! keeps the protocol deadlock-free: a contended registration fails
//! immediately instead of waiting on another transaction's locks.

mod key;
mod registry;

pub use key::{parse_lock_key, LockKeyParseError, RowKey};
pub use registry::{LockConflict, LockRegistry};
