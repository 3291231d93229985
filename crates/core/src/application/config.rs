// Runtime configuration (values only; loading lives in the daemon)

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every knob the admission paths, worker pool and dispatcher consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    // Immediate mode
    pub max_sync_concurrency: usize,
    pub work_timeout_ms: u64,

    // Deferred mode
    pub num_workers: usize,
    pub max_queue_size: usize,
    pub callback_timeout_ms: u64,
    pub max_callback_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Jitter fraction applied to each backoff delay (0.0 disables)
    pub backoff_jitter: f64,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub max_payload_bytes: usize,

    // Callback target policy
    pub allowed_callback_schemes: Vec<String>,
    pub block_private_ips: bool,
    pub block_localhost: bool,

    // Shutdown
    pub drain_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_sync_concurrency: DEFAULT_MAX_SYNC_CONCURRENCY,
            work_timeout_ms: DEFAULT_WORK_TIMEOUT_MS,
            num_workers: DEFAULT_NUM_WORKERS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT_MS,
            max_callback_attempts: DEFAULT_MAX_CALLBACK_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_jitter: DEFAULT_BACKOFF_JITTER,
            rate_limit_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            allowed_callback_schemes: vec!["http".to_string(), "https".to_string()],
            block_private_ips: true,
            block_localhost: true,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl RuntimeConfig {
    /// Reject values that would make a bounded resource unusable
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_sync_concurrency", self.max_sync_concurrency as u64),
            ("num_workers", self.num_workers as u64),
            ("max_queue_size", self.max_queue_size as u64),
            ("max_callback_attempts", self.max_callback_attempts as u64),
            ("rate_limit_requests", self.rate_limit_requests as u64),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
            ("work_timeout_ms", self.work_timeout_ms),
            ("callback_timeout_ms", self.callback_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(AppError::Config(
                "backoff_max_ms must be >= backoff_base_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(AppError::Config(
                "backoff_jitter must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.allowed_callback_schemes.is_empty() {
            return Err(AppError::Config(
                "allowed_callback_schemes must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn work_timeout(&self) -> Duration {
        Duration::from_millis(self.work_timeout_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.num_workers, 5);
        assert!(config.block_private_ips && config.block_localhost);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = RuntimeConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_queue_size"));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_value(serde_json::json!({"num_workers": 2})).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.max_callback_attempts, DEFAULT_MAX_CALLBACK_ATTEMPTS);
    }
}
