//! Exponential backoff policy for transient provider failures.
//!
//! The runtime owns the retry loop itself (it has to interleave retries
//! with event emission and cancellation); this module only computes the
//! timing. Defaults: 500 ms initial delay, factor 2, 30 s cap, 5 attempts,
//! full jitter.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration for retryable agent calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Useful for tests and playback runs
    /// where a miss can only repeat.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    /// Attempts are 1-based: `attempt == 1` is the first failed call.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to sleep before attempt `attempt + 1`.
    ///
    /// The exponential curve is computed from the failed attempt count,
    /// capped, then jittered over `[delay/2, delay]` so synchronized
    /// clients fan out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let raw = self.initial_delay.as_millis() as f64 * exp;
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let millis = if self.jitter {
            let mut rng = rand::thread_rng();
            rng.gen_range((capped / 2.0)..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}
