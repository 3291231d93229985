// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::payload::WorkPayload;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Admission path a request came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Immediate,
    Deferred,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Immediate => "immediate",
            RequestMode::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for RequestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "immediate" => Ok(RequestMode::Immediate),
            "deferred" => Ok(RequestMode::Deferred),
            other => Err(DomainError::ValidationError(format!(
                "Unknown request mode: {}",
                other
            ))),
        }
    }
}

/// Job lifecycle state
///
/// Progression is monotonic:
/// `queued -> running -> succeeded|failed -> delivering -> delivered|delivery_failed`
///
/// Restart recovery may additionally skip ahead (`queued -> failed`,
/// `succeeded|failed -> delivery_failed`); nothing ever moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Delivering,
    Delivered,
    DeliveryFailed,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Delivering,
        JobState::Delivered,
        JobState::DeliveryFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Delivering => "delivering",
            JobState::Delivered => "delivered",
            JobState::DeliveryFailed => "delivery_failed",
        }
    }

    /// States from which `self` may be entered
    pub fn predecessors(&self) -> &'static [JobState] {
        match self {
            JobState::Queued => &[],
            JobState::Running => &[JobState::Queued],
            JobState::Succeeded => &[JobState::Running],
            // Queued -> Failed only happens during restart recovery
            JobState::Failed => &[JobState::Running, JobState::Queued],
            JobState::Delivering => &[JobState::Succeeded, JobState::Failed],
            JobState::Delivered => &[JobState::Delivering],
            // Succeeded/Failed -> DeliveryFailed only happens during restart recovery
            JobState::DeliveryFailed => &[
                JobState::Delivering,
                JobState::Succeeded,
                JobState::Failed,
            ],
        }
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        next.predecessors().contains(self)
    }

    /// Compute phase finished (job may still await delivery)
    pub fn is_computed(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("Unknown job state: {}", s)))
    }
}

/// Result of the compute phase. Result and error can never both be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Succeeded(serde_json::Value),
    Failed(String),
}

impl Outcome {
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            Outcome::Succeeded(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Rebuild from the two nullable storage columns
    pub fn from_parts(result: Option<serde_json::Value>, error: Option<String>) -> Self {
        match (result, error) {
            (_, Some(e)) => Outcome::Failed(e),
            (Some(v), None) => Outcome::Succeeded(v),
            (None, None) => Outcome::Pending,
        }
    }
}

/// Job Entity - one admitted request (immediate or deferred)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub mode: RequestMode,
    pub payload: WorkPayload,
    pub callback_url: Option<String>,

    pub state: JobState,
    pub outcome: Outcome,

    /// Work Engine execution attempts (single-attempt policy)
    pub attempts: u32,
    pub delivery_attempts: u32,
    pub delivery_error: Option<String>,

    pub client_ip: String,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub delivered_at: Option<i64>,
}

impl Job {
    /// Create a new job in `queued` state
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        mode: RequestMode,
        payload: WorkPayload,
        callback_url: Option<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            mode,
            payload,
            callback_url,
            state: JobState::Queued,
            outcome: Outcome::Pending,
            attempts: 0,
            delivery_attempts: 0,
            delivery_error: None,
            client_ip: client_ip.into(),
            created_at,
            started_at: None,
            completed_at: None,
            delivered_at: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// **Note**: only for tests. Production code injects ID and time via providers.
    pub fn new_test(mode: RequestMode, payload: WorkPayload, callback_url: Option<&str>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            mode,
            payload,
            callback_url.map(str::to_string),
            "127.0.0.1",
        )
    }

    fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// queued -> running
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobState::Running)?;
        self.attempts += 1;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// running -> succeeded
    pub fn succeed(&mut self, result: serde_json::Value, now_millis: i64) -> Result<()> {
        self.transition(JobState::Succeeded)?;
        self.outcome = Outcome::Succeeded(result);
        self.completed_at = Some(now_millis);
        Ok(())
    }

    /// running -> failed (queued -> failed during recovery)
    pub fn fail(&mut self, error: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.outcome = Outcome::Failed(error.into());
        self.completed_at = Some(now_millis);
        Ok(())
    }

    /// succeeded|failed -> delivering
    pub fn begin_delivery(&mut self) -> Result<()> {
        self.transition(JobState::Delivering)
    }

    /// Record one delivery attempt (state stays `delivering`)
    pub fn record_delivery_attempt(&mut self, error: Option<String>) {
        self.delivery_attempts += 1;
        self.delivery_error = error;
    }

    /// delivering -> delivered
    pub fn mark_delivered(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobState::Delivered)?;
        self.delivery_error = None;
        self.delivered_at = Some(now_millis);
        Ok(())
    }

    /// delivering -> delivery_failed
    pub fn mark_delivery_failed(&mut self, error: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(JobState::DeliveryFailed)?;
        self.delivery_error = Some(error.into());
        self.delivered_at = Some(now_millis);
        Ok(())
    }

    /// Wall-clock compute latency
    pub fn execution_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
