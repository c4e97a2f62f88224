//! Transaction coordinator core.
//!
//! The [`Coordinator`] implements the server side of the global transaction
//! protocol: it assigns xids, registers branches under their row locks,
//! drives phase-two commit/rollback across resource managers in
//! registration order, and re-drives stuck sessions from background sweeps
//! until they terminate or exhaust their retry budgets.

mod console;
mod coordinator;
mod error;
mod ratelimit;
mod resource;
mod retry;

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, ConsoleResult};
pub use ratelimit::TokenBucket;
pub use resource::{BranchContext, BranchOutcome, BranchResource, ResourceRegistry};
