// Worker - Job execution loop

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::dispatcher::CallbackDispatcher;
use crate::application::execution::execute_guarded;
use crate::application::persist::persist_with_retry;
use crate::application::queue::JobQueue;
use crate::domain::{Job, JobState, RequestMode};
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider, WorkEngine};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Everything a worker needs; shared by the whole pool
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub job_repo: Arc<dyn JobRepository>,
    pub engine: Arc<dyn WorkEngine>,
    pub dispatcher: Arc<CallbackDispatcher>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub work_timeout: Duration,
}

/// Worker dequeues jobs, runs them through the engine and hands them to delivery
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    active: Arc<AtomicUsize>,
}

/// Marks the worker busy for the duration of one job
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext, active: Arc<AtomicUsize>) -> Self {
        Self { id, ctx, active }
    }

    /// Run until the queue is closed and drained, or a hard stop is signalled
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker_id = self.id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(worker_id = self.id, "Worker shutting down");
                break;
            }

            let job = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(worker_id = self.id, "Worker interrupted while idle");
                    break;
                }
                job = self.ctx.queue.dequeue() => job,
            };

            let Some(job) = job else {
                info!(worker_id = self.id, "Queue closed and drained");
                break;
            };

            if let Err(e) = self.process_job(job).await {
                error!(worker_id = self.id, error = %e, "Worker error");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => {
                        info!(worker_id = self.id, "Worker interrupted during error recovery");
                        break;
                    }
                }
            }
        }
        info!(worker_id = self.id, "Worker stopped");
        Ok(())
    }

    /// Execute one job end to end. Engine failures are recorded on the job,
    /// only store errors are returned. The job counts as processed either way.
    pub async fn process_job(&self, job: Job) -> Result<JobState> {
        let result = self.execute_job(job).await;
        self.ctx.queue.mark_processed();
        result
    }

    async fn execute_job(&self, mut job: Job) -> Result<JobState> {
        let ctx = &self.ctx;
        let started = ctx.time_provider.now_millis();
        job.start(started)?;
        // On failure the row is still queued and restart recovery re-queues it
        persist_with_retry(&job.id, "running", || {
            ctx.job_repo
                .update_state(&job.id, JobState::Running, None, started)
        })
        .await?;

        info!(
            worker_id = self.id,
            job_id = %job.id,
            operation = %job.payload.operation,
            complexity = job.payload.complexity.level(),
            "Processing job"
        );

        let result = {
            let _active = ActiveGuard::new(&self.active);
            execute_guarded(
                Arc::clone(&ctx.engine),
                job.payload.clone(),
                ctx.work_timeout,
            )
            .await
        };

        let finished = ctx.time_provider.now_millis();
        match result {
            Ok(value) => {
                job.succeed(value, finished)?;
                info!(worker_id = self.id, job_id = %job.id, "Job succeeded");
            }
            Err(e) => {
                warn!(worker_id = self.id, job_id = %job.id, error = %e, "Job failed");
                job.fail(e.to_string(), finished)?;
            }
        }

        let settled = persist_with_retry(&job.id, "outcome", || {
            ctx.job_repo
                .update_state(&job.id, job.state, Some(&job.outcome), finished)
        })
        .await;
        if let Err(e) = &settled {
            error!(worker_id = self.id, job_id = %job.id, error = %e, "Outcome not persisted");
        }

        let state = job.state;
        match (job.mode, job.callback_url.is_some()) {
            (RequestMode::Deferred, true) if settled.is_ok() => ctx.dispatcher.dispatch(job),
            (RequestMode::Deferred, true) => ctx.dispatcher.dispatch_unsettled(job, finished),
            (RequestMode::Deferred, false) => {
                error!(job_id = %job.id, "Deferred job without callback target")
            }
            (RequestMode::Immediate, _) => {}
        }
        settled.map(|_| state)
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerMetrics {
    pub total: usize,
    pub active: usize,
}

/// Fixed set of N workers started together
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn spawn(size: usize, ctx: WorkerContext, shutdown: ShutdownToken) -> Self {
        let active = Arc::new(AtomicUsize::new(0));
        let handles = (0..size)
            .map(|id| {
                let worker = Worker::new(id, ctx.clone(), Arc::clone(&active));
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = worker.run(token).await {
                        error!(worker_id = id, error = %e, "Worker exited with error");
                    }
                })
            })
            .collect();
        info!(workers = size, "Worker pool started");
        Self { handles, active }
    }

    /// Shared busy counter (read by metrics)
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    pub fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            total: self.handles.len(),
            active: self.active.load(Ordering::SeqCst),
        }
    }

    /// Wait for every worker to exit
    pub async fn join(&mut self) {
        for handle in self.handles.iter_mut() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Worker task panicked: {}", e);
                }
            }
        }
    }

    /// Kill whatever is still running
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::retry::DeliveryRetryPolicy;
    use crate::domain::{Complexity, Operation, WorkPayload};
    use crate::port::callback_transport::mocks::MockCallbackTransport;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::work_engine::mocks::MockWorkEngine;
    use serde_json::json;
    use std::time::Instant;

    struct Harness {
        queue: Arc<JobQueue>,
        repo: Arc<InMemoryJobRepository>,
        engine: Arc<MockWorkEngine>,
        transport: Arc<MockCallbackTransport>,
        ctx: WorkerContext,
        _stop: ShutdownSender,
        token: ShutdownToken,
    }

    fn harness(engine: MockWorkEngine, capacity: usize, timeout: Duration) -> Harness {
        let queue = Arc::new(JobQueue::new(capacity));
        let repo = Arc::new(InMemoryJobRepository::new());
        let engine = Arc::new(engine);
        let transport = Arc::new(MockCallbackTransport::always_ok());
        let (stop, token) = shutdown_channel();
        let dispatcher = Arc::new(CallbackDispatcher::new(
            repo.clone(),
            transport.clone(),
            Arc::new(SystemTimeProvider),
            DeliveryRetryPolicy::new(3, 5, 20, 0.0),
            Duration::from_secs(1),
            token.clone(),
        ));
        let ctx = WorkerContext {
            queue: queue.clone(),
            job_repo: repo.clone(),
            engine: engine.clone(),
            dispatcher,
            time_provider: Arc::new(SystemTimeProvider),
            work_timeout: timeout,
        };
        Harness {
            queue,
            repo,
            engine,
            transport,
            ctx,
            _stop: stop,
            token,
        }
    }

    async fn admit(h: &Harness, tag: &str) -> Job {
        let job = Job::new_test(
            RequestMode::Deferred,
            WorkPayload::new(
                Operation::Hash,
                Complexity::new(1).unwrap(),
                json!({ "job": tag }),
            ),
            Some("https://hooks.example.com/cb"),
        );
        h.repo.save(&job).await.unwrap();
        h.queue.enqueue(job.clone()).unwrap();
        job
    }

    async fn wait_for_state(repo: &InMemoryJobRepository, id: &str, state: JobState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let job = repo.get(&id.to_string()).await.unwrap().unwrap();
            if job.state == state {
                return;
            }
            assert!(Instant::now() < deadline, "job {} stuck in {}", id, job.state);
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_process_job_records_success_and_delivers() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        admit(&h, "a").await;
        let job = h.queue.dequeue().await.unwrap();

        let worker = Worker::new(0, h.ctx.clone(), Arc::new(AtomicUsize::new(0)));
        assert_eq!(worker.process_job(job.clone()).await.unwrap(), JobState::Succeeded);

        wait_for_state(&h.repo, &job.id, JobState::Delivered).await;
        assert_eq!(h.transport.post_count(), 1);
        let stored = h.repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.outcome.result().is_some());
    }

    #[tokio::test]
    async fn test_engine_panic_is_recorded_and_worker_survives() {
        let h = harness(
            MockWorkEngine::new_panic_inducing("boom"),
            10,
            Duration::from_secs(1),
        );
        let mut pool = WorkerPool::spawn(1, h.ctx.clone(), h.token.clone());

        let first = admit(&h, "first").await;
        wait_for_state(&h.repo, &first.id, JobState::Delivered).await;
        let stored = h.repo.get(&first.id).await.unwrap().unwrap();
        assert!(stored.outcome.error().unwrap().contains("boom"));

        // Same single worker keeps going
        h.engine
            .set_behavior(crate::port::work_engine::mocks::MockBehavior::Succeed(
                Duration::from_millis(1),
            ));
        let second = admit(&h, "second").await;
        wait_for_state(&h.repo, &second.id, JobState::Delivered).await;

        h.queue.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_timeout_marks_job_failed() {
        let h = harness(
            MockWorkEngine::new_slow(Duration::from_secs(10)),
            10,
            Duration::from_millis(30),
        );
        admit(&h, "slow").await;
        let job = h.queue.dequeue().await.unwrap();
        let worker = Worker::new(0, h.ctx.clone(), Arc::new(AtomicUsize::new(0)));

        assert_eq!(worker.process_job(job.clone()).await.unwrap(), JobState::Failed);
        let stored = h.repo.get(&job.id).await.unwrap().unwrap();
        assert!(stored.outcome.error().unwrap().contains("timeout"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_running_jobs() {
        let h = harness(
            MockWorkEngine::new_slow(Duration::from_millis(40)),
            50,
            Duration::from_secs(2),
        );
        let mut pool = WorkerPool::spawn(3, h.ctx.clone(), h.token.clone());

        let mut jobs = Vec::new();
        for i in 0..12 {
            jobs.push(admit(&h, &format!("job-{}", i)).await);
        }
        for job in &jobs {
            wait_for_state(&h.repo, &job.id, JobState::Delivered).await;
        }

        assert!(h.engine.max_concurrency() <= 3);
        assert_eq!(h.engine.same_job_overlaps(), 0);
        assert_eq!(h.engine.call_count(), 12);
        assert_eq!(h.queue.metrics().total_processed, 12);

        h.queue.close();
        pool.join().await;
        assert_eq!(pool.metrics().active, 0);
    }

    #[tokio::test]
    async fn test_hard_stop_ends_idle_workers() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        let mut pool = WorkerPool::spawn(2, h.ctx.clone(), h.token.clone());
        h._stop.shutdown();
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_outcome_write_retried_after_store_hiccup() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        let admitted = admit(&h, "hiccup").await;
        h.repo.fail_updates_to(JobState::Succeeded, 1);
        let job = h.queue.dequeue().await.unwrap();

        let worker = Worker::new(0, h.ctx.clone(), Arc::new(AtomicUsize::new(0)));
        assert_eq!(worker.process_job(job).await.unwrap(), JobState::Succeeded);

        wait_for_state(&h.repo, &admitted.id, JobState::Delivered).await;
        assert_eq!(h.transport.post_count(), 1);
        assert_eq!(h.queue.metrics().total_processed, 1);
    }

    #[tokio::test]
    async fn test_unpersisted_outcome_handed_to_delivery() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        let admitted = admit(&h, "late").await;
        // More failures than the worker's own retries absorb
        h.repo.fail_updates_to(JobState::Succeeded, PERSIST_RETRY_ATTEMPTS + 1);
        let job = h.queue.dequeue().await.unwrap();

        let worker = Worker::new(0, h.ctx.clone(), Arc::new(AtomicUsize::new(0)));
        assert!(worker.process_job(job).await.is_err());
        assert_eq!(h.queue.metrics().total_processed, 1);

        wait_for_state(&h.repo, &admitted.id, JobState::Delivered).await;
        let stored = h.repo.get(&admitted.id).await.unwrap().unwrap();
        assert!(stored.outcome.result().is_some());
        assert_eq!(h.transport.post_count(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_never_delivers_unrecorded_outcome() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        let admitted = admit(&h, "outage").await;
        h.repo.fail_updates_to(JobState::Succeeded, 100);
        let mut pool = WorkerPool::spawn(1, h.ctx.clone(), h.token.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.queue.metrics().total_processed == 0 {
            assert!(Instant::now() < deadline, "worker never finished the job");
            sleep(Duration::from_millis(10)).await;
        }
        tokio::time::timeout(Duration::from_secs(2), h.ctx.dispatcher.wait_idle())
            .await
            .unwrap();

        let stored = h.repo.get(&admitted.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Running);
        assert_eq!(h.transport.post_count(), 0);
        assert_eq!(pool.metrics().active, 0);

        h.queue.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_unclaimable_job_is_left_queued() {
        let h = harness(MockWorkEngine::new_success(), 10, Duration::from_secs(1));
        let admitted = admit(&h, "unclaimed").await;
        h.repo.fail_updates_to(JobState::Running, 100);
        let job = h.queue.dequeue().await.unwrap();

        let worker = Worker::new(0, h.ctx.clone(), Arc::new(AtomicUsize::new(0)));
        assert!(worker.process_job(job).await.is_err());

        let stored = h.repo.get(&admitted.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Queued);
        assert_eq!(h.engine.call_count(), 0);
        assert_eq!(h.queue.metrics().total_processed, 1);
    }
}
