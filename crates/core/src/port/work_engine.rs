// Work Engine Port
// Pluggable compute kernels: (operation, complexity, params) -> result payload

use crate::domain::WorkPayload;
use async_trait::async_trait;
use thiserror::Error;

/// Computation errors (recorded on the job, never retried)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("Work execution timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Work execution error: {0}")]
    Failed(String),

    #[error("Work execution panicked: {0}")]
    Panicked(String),

    #[error("Work execution cancelled")]
    Cancelled,
}

/// Work Engine trait
///
/// Execution time must grow monotonically with `payload.complexity`, and the
/// engine must be callable concurrently with no shared mutable state between calls.
/// Dropping the returned future abandons the unit of work.
#[async_trait]
pub trait WorkEngine: Send + Sync {
    async fn execute(
        &self,
        payload: &WorkPayload,
    ) -> std::result::Result<serde_json::Value, ComputationError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock engine behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Sleep, then return `{"operation": .., "complexity": ..}`
        Succeed(Duration),
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Never finish (for timeout testing)
        Hang,
    }

    /// Mock Work Engine with concurrency instrumentation
    ///
    /// Tracks how many executions overlap in total and per job, where the
    /// job is identified by `payload.data["job"]` when present.
    pub struct MockWorkEngine {
        behavior: Mutex<MockBehavior>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        per_job: Mutex<HashMap<String, usize>>,
        overlaps: AtomicUsize,
    }

    struct InFlight<'a> {
        engine: &'a MockWorkEngine,
        key: Option<String>,
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(key) = &self.key {
                let mut per_job = self.engine.per_job.lock().unwrap();
                if let Some(count) = per_job.get_mut(key) {
                    *count -= 1;
                }
            }
        }
    }

    impl MockWorkEngine {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                per_job: Mutex::new(HashMap::new()),
                overlaps: AtomicUsize::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed(Duration::from_millis(1)))
        }

        pub fn new_slow(delay: Duration) -> Self {
            Self::new(MockBehavior::Succeed(delay))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Highest number of simultaneous executions observed
        pub fn max_concurrency(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// Times an execution started while the same job was already executing
        pub fn same_job_overlaps(&self) -> usize {
            self.overlaps.load(Ordering::SeqCst)
        }

        fn enter(&self, payload: &WorkPayload) -> InFlight<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let key = payload
                .data
                .get("job")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let Some(key) = &key {
                let mut per_job = self.per_job.lock().unwrap();
                let count = per_job.entry(key.clone()).or_insert(0);
                if *count > 0 {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                *count += 1;
            }
            InFlight { engine: self, key }
        }
    }

    #[async_trait]
    impl WorkEngine for MockWorkEngine {
        async fn execute(
            &self,
            payload: &WorkPayload,
        ) -> std::result::Result<serde_json::Value, ComputationError> {
            let _guard = self.enter(payload);
            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Succeed(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(serde_json::json!({
                        "operation": payload.operation.as_str(),
                        "complexity": payload.complexity.level(),
                    }))
                }
                MockBehavior::Fail(msg) => Err(ComputationError::Failed(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Hang => {
                    std::future::pending::<()>().await;
                    Err(ComputationError::Cancelled)
                }
            }
        }
    }
}
