//! Compute Runtime - owns the queue, worker pool and dispatcher
//!
//! Built once by the composition root, handed to request handlers through
//! `service()`, and torn down with `shutdown`.

use crate::application::callback_url::{CallbackUrlPolicy, CallbackUrlValidator};
use crate::application::config::RuntimeConfig;
use crate::application::dispatcher::CallbackDispatcher;
use crate::application::gate::ImmediateGate;
use crate::application::queue::JobQueue;
use crate::application::rate_limiter::RateLimiter;
use crate::application::recovery::{RecoveryReport, RecoveryService};
use crate::application::retry::DeliveryRetryPolicy;
use crate::application::service::{ComputeService, ServiceDeps};
use crate::application::worker::{shutdown_channel, ShutdownSender, WorkerContext, WorkerPool};
use crate::error::Result;
use crate::port::{CallbackTransport, HostResolver, IdProvider, JobRepository, TimeProvider, WorkEngine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// External collaborators (adapters) the runtime is wired with
#[derive(Clone)]
pub struct RuntimeDeps {
    pub job_repo: Arc<dyn JobRepository>,
    pub engine: Arc<dyn WorkEngine>,
    pub transport: Arc<dyn CallbackTransport>,
    pub resolver: Arc<dyn HostResolver>,
    pub id_provider: Arc<dyn IdProvider>,
    pub time_provider: Arc<dyn TimeProvider>,
}

/// How the drain went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Queue emptied and every delivery finished before the deadline
    pub drained: bool,
    /// Jobs still in the queue (they stay `queued` in the store)
    pub left_in_queue: usize,
    pub deliveries_in_flight: usize,
}

pub struct ComputeRuntime {
    config: RuntimeConfig,
    deps: RuntimeDeps,
    service: Arc<ComputeService>,
    queue: Arc<JobQueue>,
    dispatcher: Arc<CallbackDispatcher>,
    pool: WorkerPool,
    hard_stop: ShutdownSender,
}

impl ComputeRuntime {
    /// Validate config and start the worker pool. Must run inside a tokio runtime.
    pub fn start(config: RuntimeConfig, deps: RuntimeDeps) -> Result<Self> {
        config.validate()?;

        let (hard_stop, token) = shutdown_channel();
        let queue = Arc::new(JobQueue::new(config.max_queue_size));

        let dispatcher = Arc::new(CallbackDispatcher::new(
            Arc::clone(&deps.job_repo),
            Arc::clone(&deps.transport),
            Arc::clone(&deps.time_provider),
            DeliveryRetryPolicy::from_config(&config),
            config.callback_timeout(),
            token.clone(),
        ));

        let pool = WorkerPool::spawn(
            config.num_workers,
            WorkerContext {
                queue: Arc::clone(&queue),
                job_repo: Arc::clone(&deps.job_repo),
                engine: Arc::clone(&deps.engine),
                dispatcher: Arc::clone(&dispatcher),
                time_provider: Arc::clone(&deps.time_provider),
                work_timeout: config.work_timeout(),
            },
            token,
        );

        let service = Arc::new(ComputeService::new(
            ServiceDeps {
                job_repo: Arc::clone(&deps.job_repo),
                engine: Arc::clone(&deps.engine),
                id_provider: Arc::clone(&deps.id_provider),
                time_provider: Arc::clone(&deps.time_provider),
            },
            RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window_secs,
                Arc::clone(&deps.time_provider),
            ),
            ImmediateGate::new(config.max_sync_concurrency),
            Arc::clone(&queue),
            CallbackUrlValidator::new(
                CallbackUrlPolicy::from_config(&config),
                Arc::clone(&deps.resolver),
            ),
            Arc::clone(&dispatcher),
            (config.num_workers, pool.active_counter()),
            config.work_timeout(),
            config.max_payload_bytes,
        ));

        info!(
            workers = config.num_workers,
            queue_capacity = config.max_queue_size,
            immediate_capacity = config.max_sync_concurrency,
            "Compute runtime started"
        );

        Ok(Self {
            config,
            deps,
            service,
            queue,
            dispatcher,
            pool,
            hard_stop,
        })
    }

    /// Handle given to request handlers
    pub fn service(&self) -> Arc<ComputeService> {
        Arc::clone(&self.service)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Settle jobs left behind by a previous process and re-queue the rest
    pub async fn recover(&self) -> Result<RecoveryReport> {
        RecoveryService::new(
            Arc::clone(&self.deps.job_repo),
            Arc::clone(&self.deps.time_provider),
        )
        .recover(&self.queue)
        .await
    }

    /// Graceful drain:
    /// stop admissions, close the queue, let workers finish it and deliveries
    /// complete; whatever is still running at the deadline is stopped.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> ShutdownReport {
        info!(drain_timeout_ms = drain_timeout.as_millis() as u64, "Draining compute runtime");
        self.service.stop_admissions();
        self.queue.close();

        let pool = &mut self.pool;
        let dispatcher = &self.dispatcher;
        let drained = tokio::time::timeout(drain_timeout, async {
            pool.join().await;
            dispatcher.wait_idle().await;
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                left_in_queue = self.queue.len(),
                deliveries_in_flight = self.dispatcher.in_flight(),
                "Drain deadline reached, stopping remaining work"
            );
            self.hard_stop.shutdown();
            self.pool.abort();
        }

        let report = ShutdownReport {
            drained,
            left_in_queue: self.queue.len(),
            deliveries_in_flight: self.dispatcher.in_flight(),
        };
        info!(drained = report.drained, "Compute runtime stopped");
        report
    }
}
