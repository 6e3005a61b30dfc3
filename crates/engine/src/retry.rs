//! Send retry policy with jittered exponential back-off.

use std::time::Duration;

use fc_domain::config::RetryConfig;

use crate::jitter;

/// Controls how a per-recipient send is retried on transient errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Maximum number of attempts per recipient (first try included).
    pub max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay after the given failed attempt (1-based):
    /// `base · 2^(attempt−1)`, capped, plus up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);
        jitter::between(capped, capped + capped.mul_f64(0.25))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
