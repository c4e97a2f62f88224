//! Session state for the Concord transaction coordinator.
//!
//! A [`GlobalSession`] aggregates the branches of one global transaction and
//! carries its status machine; the [`SessionManager`] owns the live session
//! table, serializes mutations per xid, and writes every mutation through to
//! a pluggable [`SessionStore`] before any irreversible side effect happens.

mod branch;
mod global;
mod manager;
mod store;

pub use branch::BranchSession;
pub use global::GlobalSession;
pub use manager::{SessionHandle, SessionLifecycle, SessionManager};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
