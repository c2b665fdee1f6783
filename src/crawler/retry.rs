//! Retry and backoff decisions

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with jitter
///
/// `next_delay(n)` is `min(c + jitter, max_delay)` where
/// `c = min(base_delay * 2^n, max_delay)` and `jitter` is uniform in `[0, c)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for fetch attempts of one URL
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Policy for queue operations; workers never give up on the queue
    pub fn for_queue(config: &RetryConfig) -> Self {
        Self::new(
            u32::MAX,
            Duration::from_millis(config.queue_backoff_base_ms),
            Duration::from_millis(config.queue_backoff_max_ms),
        )
    }

    /// The deterministic part of the delay after `n` previous failures
    pub fn capped_delay(&self, n: u32) -> Duration {
        2u32.checked_pow(n)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Delay before the next try after `n` previous failures
    pub fn next_delay(&self, n: u32) -> Duration {
        let capped = self.capped_delay(n);
        let capped_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);

        let jitter_ms = if capped_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..capped_ms)
        };

        capped
            .saturating_add(Duration::from_millis(jitter_ms))
            .min(self.max_delay)
    }

    /// True once `attempts` tries have been spent
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
