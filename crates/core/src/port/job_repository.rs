// Job Repository Port (Lifecycle Store)

use crate::domain::{Job, JobId, JobState, Outcome, RequestMode};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default page size for `list`
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Maximum page size for `list`
pub const MAX_LIST_LIMIT: u32 = 100;

/// Filters for listing jobs (newest first)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilter {
    pub mode: Option<RequestMode>,
    pub state: Option<JobState>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            mode: None,
            state: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl JobFilter {
    /// Clamp limit into 1..=MAX_LIST_LIMIT
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_LIST_LIMIT);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.mode.map_or(true, |m| m == job.mode) && self.state.map_or(true, |s| s == job.state)
    }
}

/// One page of jobs
#[derive(Debug, Clone)]
pub struct JobPage {
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    pub jobs: Vec<Job>,
}

/// Aggregates over every stored job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub total: i64,
    pub by_mode: HashMap<String, i64>,
    pub by_state: HashMap<String, i64>,
    pub avg_execution_time_ms: HashMap<String, f64>,
}

/// Repository interface for job persistence (system of record for state transitions)
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn save(&self, job: &Job) -> Result<()>;

    /// Move a job to `state`, stamping the matching timestamp.
    ///
    /// Only applies when the stored state is a legal predecessor of `state`.
    /// `outcome` is written for `succeeded` / `failed`.
    async fn update_state(
        &self,
        id: &JobId,
        state: JobState,
        outcome: Option<&Outcome>,
        at_millis: i64,
    ) -> Result<()>;

    /// Persist the delivery attempt counter and the last delivery error
    async fn record_delivery_attempt(
        &self,
        id: &JobId,
        delivery_attempts: u32,
        error: Option<&str>,
    ) -> Result<()>;

    /// Find job by ID
    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// List jobs matching the filter, newest first
    async fn list(&self, filter: &JobFilter) -> Result<JobPage>;

    /// Find all jobs in a state, oldest first (for recovery)
    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Aggregate counters
    async fn metrics(&self) -> Result<StoreMetrics>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;
}

/// Stamp the timestamp column that belongs to `state`
pub fn apply_state(job: &mut Job, state: JobState, outcome: Option<&Outcome>, at_millis: i64) {
    job.state = state;
    match state {
        JobState::Running => {
            job.started_at = Some(at_millis);
            job.attempts += 1;
        }
        JobState::Succeeded | JobState::Failed => {
            if let Some(outcome) = outcome {
                job.outcome = outcome.clone();
            }
            job.completed_at = Some(at_millis);
        }
        JobState::Delivered | JobState::DeliveryFailed => job.delivered_at = Some(at_millis),
        JobState::Queued | JobState::Delivering => {}
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// In-memory store guarded by a single writer lock
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<Vec<Job>>,
        history: Mutex<Vec<(JobId, JobState)>>,
        /// Remaining injected failures per target state
        update_faults: Mutex<Vec<(JobState, u32)>>,
        attempt_faults: Mutex<u32>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next `times` moves to `state` fail with a database error
        pub fn fail_updates_to(&self, state: JobState, times: u32) {
            self.update_faults.lock().unwrap().push((state, times));
        }

        /// The next `times` delivery attempt records fail with a database error
        pub fn fail_attempt_records(&self, times: u32) {
            *self.attempt_faults.lock().unwrap() += times;
        }

        fn injected_update_fault(&self, state: JobState) -> Option<AppError> {
            let mut faults = self.update_faults.lock().unwrap();
            let (_, remaining) = faults
                .iter_mut()
                .find(|(target, remaining)| *target == state && *remaining > 0)?;
            *remaining -= 1;
            Some(AppError::Database(format!("injected failure writing {}", state)))
        }

        /// Every state a job has been moved to, in order
        pub fn history_of(&self, id: &str) -> Vec<JobState> {
            self.history
                .lock()
                .unwrap()
                .iter()
                .filter(|(job_id, _)| job_id == id)
                .map(|(_, state)| *state)
                .collect()
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn save(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(AppError::Database(format!(
                    "Unique constraint violation: {}",
                    job.id
                )));
            }
            jobs.push(job.clone());
            self.history
                .lock()
                .unwrap()
                .push((job.id.clone(), job.state));
            Ok(())
        }

        async fn update_state(
            &self,
            id: &JobId,
            state: JobState,
            outcome: Option<&Outcome>,
            at_millis: i64,
        ) -> Result<()> {
            if let Some(e) = self.injected_update_fault(state) {
                return Err(e);
            }
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

            if !job.state.can_transition_to(state) {
                return Err(AppError::InvalidState(format!(
                    "Cannot update job {} from {} to {}",
                    id, job.state, state
                )));
            }
            apply_state(job, state, outcome, at_millis);
            self.history.lock().unwrap().push((id.clone(), state));
            Ok(())
        }

        async fn record_delivery_attempt(
            &self,
            id: &JobId,
            delivery_attempts: u32,
            error: Option<&str>,
        ) -> Result<()> {
            {
                let mut faults = self.attempt_faults.lock().unwrap();
                if *faults > 0 {
                    *faults -= 1;
                    return Err(AppError::Database("injected failure recording attempt".into()));
                }
            }
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            job.delivery_attempts = delivery_attempts;
            job.delivery_error = error.map(str::to_string);
            Ok(())
        }

        async fn get(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| &j.id == id)
                .cloned())
        }

        async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
            let filter = filter.clone().normalized();
            let jobs = self.jobs.lock().unwrap();
            let mut matching: Vec<Job> =
                jobs.iter().filter(|j| filter.matches(j)).cloned().collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = matching.len() as i64;
            let page = matching
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .collect();
            Ok(JobPage {
                total,
                limit: filter.limit,
                offset: filter.offset,
                jobs: page,
            })
        }

        async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
            let mut found: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.state == state)
                .cloned()
                .collect();
            found.sort_by_key(|j| j.created_at);
            Ok(found)
        }

        async fn metrics(&self) -> Result<StoreMetrics> {
            let jobs = self.jobs.lock().unwrap();
            let mut metrics = StoreMetrics {
                total: jobs.len() as i64,
                ..Default::default()
            };
            let mut latency: HashMap<String, (f64, u32)> = HashMap::new();
            for job in jobs.iter() {
                *metrics.by_mode.entry(job.mode.to_string()).or_default() += 1;
                *metrics.by_state.entry(job.state.to_string()).or_default() += 1;
                if let Some(ms) = job.execution_time_ms() {
                    let entry = latency.entry(job.mode.to_string()).or_default();
                    entry.0 += ms as f64;
                    entry.1 += 1;
                }
            }
            metrics.avg_execution_time_ms = latency
                .into_iter()
                .map(|(mode, (sum, n))| (mode, sum / n as f64))
                .collect();
            Ok(metrics)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }
}
