// Runtime constants (no magic values)
use std::time::Duration;

/// Immediate-mode concurrency cap
pub const DEFAULT_MAX_SYNC_CONCURRENCY: usize = 10;

/// Hard timeout for one unit of work (30s)
pub const DEFAULT_WORK_TIMEOUT_MS: u64 = 30_000;

/// Worker pool size
pub const DEFAULT_NUM_WORKERS: usize = 5;

/// Deferred queue capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Per-attempt callback HTTP timeout (10s)
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 10_000;

/// Callback delivery attempts, including the first one
pub const DEFAULT_MAX_CALLBACK_ATTEMPTS: u32 = 3;

/// Backoff before the second delivery attempt (1s), doubling afterwards
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Backoff ceiling (30s)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// ±10% jitter to avoid synchronized retries against one endpoint
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.1;

/// Token bucket capacity per client
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;

/// Window over which a full bucket refills (60s)
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Serialized payload cap (100 KiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024;

/// Time allowed for draining queue and deliveries on shutdown (10s)
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Sleep after a worker-level store error before taking the next job (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Tries for one lifecycle write before the caller falls back
pub const PERSIST_RETRY_ATTEMPTS: u32 = 4;

/// Pause after the first failed lifecycle write, doubling afterwards
pub const PERSIST_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Ceiling for the pause between lifecycle write tries
pub const PERSIST_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Error message recorded on jobs found in-flight after a restart
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Delivery error recorded when a hard stop cuts a backoff wait short
pub const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted by shutdown";
