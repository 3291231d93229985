//! Rate Limiter (Token Bucket Algorithm, one bucket per client)
//!
//! Gate in front of both admission paths. Buckets live in a sharded map;
//! refill-and-decrement runs under the shard lock for that client, so two
//! concurrent calls for the same client can never spend the same token.
//! Buckets that have refilled completely are dropped periodically; a full
//! bucket behaves exactly like one that was never created.

use crate::port::TimeProvider;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Idle buckets are swept once per this many checks
pub const PRUNE_EVERY_CHECKS: u64 = 1024;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
}

/// Per-client token bucket rate limiter
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    /// Tokens added per millisecond
    refill_per_ms: f64,
    time_provider: Arc<dyn TimeProvider>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `capacity` - Bucket size (maximum burst)
    /// * `window_secs` - Time for an empty bucket to refill completely
    ///
    /// # Example
    /// Allow 100 requests per minute per client:
    /// `RateLimiter::new(100, 60, Arc::new(SystemTimeProvider))`
    pub fn new(capacity: u32, window_secs: u64, time_provider: Arc<dyn TimeProvider>) -> Self {
        let window_ms = (window_secs.max(1) * 1000) as f64;
        Self {
            buckets: DashMap::new(),
            capacity: capacity as f64,
            refill_per_ms: capacity as f64 / window_ms,
            time_provider,
            checks: AtomicU64::new(0),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: i64) {
        let elapsed_ms = (now - bucket.last_refill_ms).max(0) as f64;
        bucket.tokens = (bucket.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        bucket.last_refill_ms = now;
    }

    /// Check and consume one token for `client_id`
    pub fn check(&self, client_id: &str) -> RateDecision {
        let now = self.time_provider.now_millis();
        let decision = {
            let mut bucket = self
                .buckets
                .entry(client_id.to_string())
                .or_insert_with(|| Bucket {
                    tokens: self.capacity,
                    last_refill_ms: now,
                });

            self.refill(&mut bucket, now);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                RateDecision::Allowed
            } else {
                let missing = 1.0 - bucket.tokens;
                let retry_after_ms = missing / self.refill_per_ms;
                RateDecision::Limited {
                    retry_after_secs: (retry_after_ms / 1000.0).ceil().max(1.0) as u64,
                }
            }
        };

        // Shard guard must be released before sweeping
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY_CHECKS == 0 {
            self.prune_idle();
        }
        decision
    }

    /// Drop every bucket that has refilled to capacity. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let now = self.time_provider.now_millis();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let elapsed_ms = (now - bucket.last_refill_ms).max(0) as f64;
            bucket.tokens + elapsed_ms * self.refill_per_ms < self.capacity
        });
        let pruned = before.saturating_sub(self.buckets.len());
        if pruned > 0 {
            debug!(pruned, remaining = self.buckets.len(), "Pruned idle rate-limit buckets");
        }
        pruned
    }

    /// Returns true if the request is allowed (consumes 1 token)
    pub fn allow(&self, client_id: &str) -> bool {
        self.check(client_id) == RateDecision::Allowed
    }

    /// Tokens currently available to `client_id` without consuming any.
    ///
    /// `None` for clients never seen (their bucket would start full).
    pub fn available(&self, client_id: &str) -> Option<f64> {
        let now = self.time_provider.now_millis();
        let mut bucket = self.buckets.get_mut(client_id)?;
        self.refill(&mut bucket, now);
        Some(bucket.tokens)
    }

    /// Number of clients with a bucket
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}
