//! Token-bucket gate for global-begin traffic.
//!
//! Process-wide state only: the bucket is never persisted and starts over
//! on restart. Only `begin` consults it; in-flight transactions always get
//! to finish.

use concord_common::{millis_now, RateLimitConfig};
use parking_lot::Mutex;

/// A greedy-refill token bucket.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Create a bucket holding the configured initial tokens.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.initial_tokens.min(config.max_tokens),
                last_refill_ms: millis_now(),
            }),
        }
    }

    /// Take one token if available. Disabled configs always pass.
    pub fn try_acquire(&self, config: &RateLimitConfig) -> bool {
        if !config.enabled {
            return true;
        }
        self.try_acquire_at(config, millis_now())
    }

    fn try_acquire_at(&self, config: &RateLimitConfig, now: u64) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_sub(state.last_refill_ms);
        if elapsed > 0 {
            let refill = (elapsed as u128 * config.tokens_per_second as u128 / 1000) as u64;
            if refill > 0 {
                state.tokens = state.tokens.saturating_add(refill).min(config.max_tokens);
                state.last_refill_ms = now;
            }
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tokens_per_second: u64, max: u64, initial: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            tokens_per_second,
            max_tokens: max,
            initial_tokens: initial,
        }
    }

    #[test]
    fn test_disabled_always_passes() {
        let config = RateLimitConfig::default();
        let bucket = TokenBucket::new(&config);
        for _ in 0..1000 {
            assert!(bucket.try_acquire(&config));
        }
    }

    #[test]
    fn test_initial_tokens_then_empty() {
        let config = config(0, 10, 3);
        let bucket = TokenBucket::new(&config);
        assert!(bucket.try_acquire(&config));
        assert!(bucket.try_acquire(&config));
        assert!(bucket.try_acquire(&config));
        assert!(!bucket.try_acquire(&config));
    }

    #[test]
    fn test_refill_over_time() {
        let config = config(1000, 10, 0);
        let bucket = TokenBucket::new(&config);
        let start = bucket.state.lock().last_refill_ms;
        assert!(!bucket.try_acquire_at(&config, start));
        // One second later the bucket has refilled up to its cap.
        assert!(bucket.try_acquire_at(&config, start + 1000));
        assert_eq!(bucket.state.lock().tokens, 9);
    }

    #[test]
    fn test_refill_clamped_to_capacity() {
        let config = config(1000, 5, 0);
        let bucket = TokenBucket::new(&config);
        let start = bucket.state.lock().last_refill_ms;
        assert!(bucket.try_acquire_at(&config, start + 60_000));
        assert_eq!(bucket.state.lock().tokens, 4);
    }
}
