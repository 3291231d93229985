//! Compute Service - admission for both modes plus read-side queries
//!
//! Immediate: rate limit -> payload checks -> gate slot -> record -> execute inline.
//! Deferred: rate limit -> payload checks -> callback target checks -> queue slot
//! -> record -> enqueue. A job is only persisted once it is certain to be admitted.

use crate::application::callback_url::CallbackUrlValidator;
use crate::application::dispatcher::CallbackDispatcher;
use crate::application::execution::execute_guarded;
use crate::application::persist::persist_with_retry;
use crate::application::gate::{GateMetrics, GatePermit, ImmediateGate};
use crate::application::queue::{JobQueue, QueueMetrics};
use crate::application::rate_limiter::{RateDecision, RateLimiter};
use crate::application::worker::WorkerMetrics;
use crate::domain::{Job, JobId, JobState, RequestMode, WorkPayload};
use crate::error::{AdmissionRejected, AppError, Result};
use crate::port::{IdProvider, JobFilter, JobRepository, StoreMetrics, TimeProvider, WorkEngine};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Read model of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub request_id: JobId,
    pub mode: RequestMode,
    pub status: JobState,
    pub operation: String,
    pub complexity: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub callback_url: Option<String>,
    pub attempts: u32,
    pub delivery_attempts: u32,
    pub delivery_error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub execution_time_ms: Option<i64>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            request_id: job.id.clone(),
            mode: job.mode,
            status: job.state,
            operation: job.payload.operation.to_string(),
            complexity: job.payload.complexity.level(),
            result: job.outcome.result().cloned(),
            error: job.outcome.error().map(str::to_string),
            callback_url: job.callback_url.clone(),
            attempts: job.attempts,
            delivery_attempts: job.delivery_attempts,
            delivery_error: job.delivery_error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            delivered_at: job.delivered_at,
            execution_time_ms: job.execution_time_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListView {
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    pub items: Vec<JobView>,
}

/// Inline answer to an immediate request (`succeeded` or `failed`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImmediateResponse {
    pub request_id: JobId,
    pub status: JobState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
}

/// Acknowledgment of a deferred request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub request_id: JobId,
    pub status: JobState,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub store: StoreMetrics,
    pub queue: QueueMetrics,
    pub workers: WorkerMetrics,
    pub immediate: GateMetrics,
    pub deliveries_in_flight: usize,
    pub rate_limited_clients: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` or `unhealthy`
    pub status: String,
    pub database: String,
    pub accepting: bool,
    pub queue_size: usize,
}

/// Collaborators injected into the service
#[derive(Clone)]
pub struct ServiceDeps {
    pub job_repo: Arc<dyn JobRepository>,
    pub engine: Arc<dyn WorkEngine>,
    pub id_provider: Arc<dyn IdProvider>,
    pub time_provider: Arc<dyn TimeProvider>,
}

pub struct ComputeService {
    deps: ServiceDeps,
    rate_limiter: RateLimiter,
    gate: ImmediateGate,
    queue: Arc<JobQueue>,
    url_validator: CallbackUrlValidator,
    dispatcher: Arc<CallbackDispatcher>,
    workers_total: usize,
    workers_active: Arc<AtomicUsize>,
    work_timeout: Duration,
    max_payload_bytes: usize,
    accepting: AtomicBool,
}

impl ComputeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deps: ServiceDeps,
        rate_limiter: RateLimiter,
        gate: ImmediateGate,
        queue: Arc<JobQueue>,
        url_validator: CallbackUrlValidator,
        dispatcher: Arc<CallbackDispatcher>,
        workers: (usize, Arc<AtomicUsize>),
        work_timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            deps,
            rate_limiter,
            gate,
            queue,
            url_validator,
            dispatcher,
            workers_total: workers.0,
            workers_active: workers.1,
            work_timeout,
            max_payload_bytes,
            accepting: AtomicBool::new(true),
        }
    }

    fn admit(&self, client_id: &str) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(AdmissionRejected::ShuttingDown.into());
        }
        match self.rate_limiter.check(client_id) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited { retry_after_secs } => {
                warn!(client_id = %client_id, retry_after_secs, "Rate limit exceeded");
                Err(AdmissionRejected::RateLimited { retry_after_secs }.into())
            }
        }
    }

    fn validate_payload(&self, payload: &WorkPayload) -> Result<()> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let size = payload.encoded_len();
        if size > self.max_payload_bytes {
            return Err(AppError::Validation(format!(
                "Payload too large: {} bytes (max {})",
                size, self.max_payload_bytes
            )));
        }
        Ok(())
    }

    fn new_job(
        &self,
        mode: RequestMode,
        payload: WorkPayload,
        callback_url: Option<String>,
        client_id: &str,
    ) -> Job {
        Job::new(
            self.deps.id_provider.generate_id(),
            self.deps.time_provider.now_millis(),
            mode,
            payload,
            callback_url,
            client_id,
        )
    }

    /// Execute synchronously under the immediate-mode gate.
    ///
    /// Engine failure or timeout is returned inline as a `failed` response;
    /// only admission, validation and store errors come back as `Err`.
    pub async fn submit_immediate(
        &self,
        client_id: &str,
        payload: WorkPayload,
    ) -> Result<ImmediateResponse> {
        self.admit(client_id)?;
        self.validate_payload(&payload)?;
        let permit = self.gate.try_acquire().map_err(|rejection| {
            warn!(client_id = %client_id, capacity = self.gate.capacity(), "Immediate gate full");
            AppError::from(rejection)
        })?;

        let job = self.new_job(RequestMode::Immediate, payload, None, client_id);
        // Owned by its own task, so a caller that goes away mid-request cannot
        // leave the row running or leak the gate slot
        let run = tokio::spawn(run_immediate(
            job,
            self.deps.clone(),
            self.work_timeout,
            permit,
        ));
        let job = run
            .await
            .map_err(|e| AppError::Internal(format!("Immediate execution task failed: {}", e)))??;

        info!(
            job_id = %job.id,
            client_id = %client_id,
            status = %job.state,
            execution_time_ms = job.execution_time_ms(),
            "Immediate request finished"
        );

        Ok(ImmediateResponse {
            request_id: job.id.clone(),
            status: job.state,
            result: job.outcome.result().cloned(),
            error: job.outcome.error().map(str::to_string),
            execution_time_ms: job.execution_time_ms(),
        })
    }

    /// Admit a job for background execution and callback delivery
    pub async fn submit_deferred(
        &self,
        client_id: &str,
        payload: WorkPayload,
        callback_url: &str,
    ) -> Result<Accepted> {
        self.admit(client_id)?;
        self.validate_payload(&payload)?;
        let url = self.url_validator.validate(callback_url).await?;

        let slot = self.queue.try_reserve().map_err(|rejection| {
            warn!(client_id = %client_id, capacity = self.queue.capacity(), "Job queue full");
            AppError::from(rejection)
        })?;

        let job = self.new_job(RequestMode::Deferred, payload, Some(url.to_string()), client_id);
        // Dropping the slot on a failed save releases it
        self.deps.job_repo.save(&job).await?;

        let request_id = job.id.clone();
        slot.send(job);

        info!(job_id = %request_id, client_id = %client_id, "Deferred request accepted");
        Ok(Accepted {
            request_id,
            status: JobState::Queued,
            queue_size: self.queue.len(),
        })
    }

    pub async fn get(&self, id: &str) -> Result<JobView> {
        self.deps
            .job_repo
            .get(&id.to_string())
            .await?
            .map(|job| JobView::from(&job))
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", id)))
    }

    pub async fn list(&self, filter: JobFilter) -> Result<JobListView> {
        let page = self.deps.job_repo.list(&filter.normalized()).await?;
        Ok(JobListView {
            total: page.total,
            limit: page.limit,
            offset: page.offset,
            items: page.jobs.iter().map(JobView::from).collect(),
        })
    }

    pub async fn metrics(&self) -> Result<ServiceMetrics> {
        Ok(ServiceMetrics {
            store: self.deps.job_repo.metrics().await?,
            queue: self.queue.metrics(),
            workers: WorkerMetrics {
                total: self.workers_total,
                active: self.workers_active.load(Ordering::SeqCst),
            },
            immediate: self.gate.metrics(),
            deliveries_in_flight: self.dispatcher.in_flight(),
            rate_limited_clients: self.rate_limiter.tracked_clients(),
        })
    }

    pub async fn health(&self) -> HealthReport {
        let (status, database) = match self.deps.job_repo.ping().await {
            Ok(()) => ("healthy", "connected".to_string()),
            Err(e) => ("unhealthy", format!("error: {}", e)),
        };
        HealthReport {
            status: status.to_string(),
            database,
            accepting: self.is_accepting(),
            queue_size: self.queue.len(),
        }
    }

    /// Every later admission fails with `ShuttingDown`
    pub fn stop_admissions(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Admissions stopped");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

/// Record, execute and settle one immediate job while holding its gate slot
async fn run_immediate(
    mut job: Job,
    deps: ServiceDeps,
    work_timeout: Duration,
    _permit: GatePermit,
) -> Result<Job> {
    let repo = &deps.job_repo;
    repo.save(&job).await?;

    let started = deps.time_provider.now_millis();
    job.start(started)?;
    persist_with_retry(&job.id, "running", || {
        repo.update_state(&job.id, JobState::Running, None, started)
    })
    .await?;

    let result = execute_guarded(Arc::clone(&deps.engine), job.payload.clone(), work_timeout).await;

    let finished = deps.time_provider.now_millis();
    match result {
        Ok(value) => job.succeed(value, finished)?,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Immediate execution failed");
            job.fail(e.to_string(), finished)?;
        }
    }
    persist_with_retry(&job.id, "outcome", || {
        repo.update_state(&job.id, job.state, Some(&job.outcome), finished)
    })
    .await?;
    Ok(job)
}
