//! Shared building blocks for the Concord transaction coordinator.
//!
//! This crate holds the pieces every other crate agrees on: transaction and
//! branch identifiers, the global/branch status machines, the error taxonomy,
//! and the hot-reloadable configuration surface.

mod config;
mod error;
mod ids;
mod model;
mod time;

pub use config::{defaults, Config, ConfigHandle, RateLimitConfig};
pub use error::{ErrorCode, Result, TransactionError};
pub use ids::{IdGenerator, Xid, XidParseError};
pub use model::{BranchStatus, BranchType, GlobalStatus};
pub use time::millis_now;
