//! Coordinator configuration.
//!
//! Every knob is snapshot-read through a [`ConfigHandle`], so operators can
//! adjust retry budgets and rate limits on a live coordinator without a
//! restart. Defaults live in [`defaults`] as named constants.

use parking_lot::RwLock;
use std::sync::Arc;

/// Default values for every configurable knob.
pub mod defaults {
    /// Attempts the commit sweep makes before giving up on a session.
    pub const COMMIT_RETRY_COUNT: u32 = 5;
    /// Attempts the rollback sweep makes before giving up on a session.
    pub const ROLLBACK_RETRY_COUNT: u32 = 5;
    /// Wall-clock budget for commit retries in millis; -1 is unbounded.
    pub const MAX_COMMIT_RETRY_TIMEOUT_MS: i64 = -1;
    /// Wall-clock budget for rollback retries in millis; -1 is unbounded.
    pub const MAX_ROLLBACK_RETRY_TIMEOUT_MS: i64 = -1;
    /// Period of the commit-retry sweep.
    pub const COMMITTING_RETRY_PERIOD_MS: u64 = 1000;
    /// Period of the async-commit sweep.
    pub const ASYNC_COMMITTING_RETRY_PERIOD_MS: u64 = 1000;
    /// Period of the rollback-retry sweep.
    pub const ROLLBACKING_RETRY_PERIOD_MS: u64 = 1000;
    /// Period of the session-timeout sweep.
    pub const TIMEOUT_RETRY_PERIOD_MS: u64 = 1000;
    /// Sessions retried longer than this are flagged for the operator.
    pub const RETRY_DEAD_THRESHOLD_MS: u64 = 2 * 60 * 1000 + 10 * 1000;
    /// Timeout applied to a begin request that does not carry its own.
    pub const GLOBAL_TRANSACTION_TIMEOUT_MS: u32 = 60_000;
    /// Per-call timeout for branch RPCs to resource managers.
    pub const RM_REQUEST_TIMEOUT_MS: u64 = 15_000;
    /// Whether locks release when a rollback ends in `RollbackFailed`.
    pub const ROLLBACK_FAILED_UNLOCK_ENABLE: bool = false;
}

/// Token-bucket parameters gating global-begin traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Master switch; when off, every begin passes.
    pub enabled: bool,
    /// Tokens added per second.
    pub tokens_per_second: u64,
    /// Bucket capacity.
    pub max_tokens: u64,
    /// Tokens available immediately after (re)initialization.
    pub initial_tokens: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tokens_per_second: u64::MAX,
            max_tokens: u64::MAX,
            initial_tokens: 0,
        }
    }
}

/// All coordinator tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub commit_retry_count: u32,
    pub rollback_retry_count: u32,
    pub max_commit_retry_timeout_ms: i64,
    pub max_rollback_retry_timeout_ms: i64,
    pub committing_retry_period_ms: u64,
    pub async_committing_retry_period_ms: u64,
    pub rollbacking_retry_period_ms: u64,
    pub timeout_retry_period_ms: u64,
    pub retry_dead_threshold_ms: u64,
    pub default_global_timeout_ms: u32,
    pub rm_request_timeout_ms: u64,
    pub rollback_failed_unlock_enable: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_retry_count: defaults::COMMIT_RETRY_COUNT,
            rollback_retry_count: defaults::ROLLBACK_RETRY_COUNT,
            max_commit_retry_timeout_ms: defaults::MAX_COMMIT_RETRY_TIMEOUT_MS,
            max_rollback_retry_timeout_ms: defaults::MAX_ROLLBACK_RETRY_TIMEOUT_MS,
            committing_retry_period_ms: defaults::COMMITTING_RETRY_PERIOD_MS,
            async_committing_retry_period_ms: defaults::ASYNC_COMMITTING_RETRY_PERIOD_MS,
            rollbacking_retry_period_ms: defaults::ROLLBACKING_RETRY_PERIOD_MS,
            timeout_retry_period_ms: defaults::TIMEOUT_RETRY_PERIOD_MS,
            retry_dead_threshold_ms: defaults::RETRY_DEAD_THRESHOLD_MS,
            default_global_timeout_ms: defaults::GLOBAL_TRANSACTION_TIMEOUT_MS,
            rm_request_timeout_ms: defaults::RM_REQUEST_TIMEOUT_MS,
            rollback_failed_unlock_enable: defaults::ROLLBACK_FAILED_UNLOCK_ENABLE,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Shared, hot-reloadable view of the configuration.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    /// Wrap a configuration for sharing.
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot the current configuration.
    pub fn get(&self) -> Config {
        self.inner.read().clone()
    }

    /// Apply a mutation; readers observe it on their next snapshot.
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut config = self.inner.write();
        f(&mut config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.commit_retry_count, 5);
        assert_eq!(config.rollback_retry_count, 5);
        assert_eq!(config.max_commit_retry_timeout_ms, -1);
        assert_eq!(config.committing_retry_period_ms, 1000);
        assert_eq!(config.retry_dead_threshold_ms, 130_000);
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn test_hot_reload_visible_to_other_handles() {
        let handle = ConfigHandle::new(Config::default());
        let other = handle.clone();
        handle.update(|c| c.rollback_retry_count = 2);
        assert_eq!(other.get().rollback_retry_count, 2);
    }
}
