// Delivery retry policy (exponential backoff with jitter)
use crate::application::config::RuntimeConfig;
use rand::Rng;
use std::time::Duration;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay
    Retry(Duration),
    /// Attempt budget exhausted, delivery has failed permanently
    GiveUp,
}

/// Backoff schedule for callback delivery
///
/// delay(n) = min(base * 2^(n-1) * (1.0 ± jitter), max) for the wait after
/// the n-th failed attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter: f64,
}

impl DeliveryRetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.max_callback_attempts,
            config.backoff_base_ms,
            config.backoff_max_ms,
            config.backoff_jitter,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after `attempts_made` failed attempts
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff_delay(attempts_made))
    }

    /// Wait after the `attempt`-th failure (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw_ms = self.base_delay_ms as f64 * 2f64.powi(exponent);

        let jittered_ms = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            raw_ms * factor
        } else {
            raw_ms
        };

        Duration::from_millis(jittered_ms.min(self.max_delay_ms as f64).max(0.0) as u64)
    }
}
