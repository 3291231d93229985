//! Shared wiring for the scenario tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use workgate_core::application::{ComputeRuntime, ComputeService, JobView, RuntimeConfig, RuntimeDeps};
use workgate_core::domain::JobState;
use workgate_core::port::{
    CallbackTransport, HostResolver, JobRepository, SystemResolver, SystemTimeProvider,
    UuidProvider, WorkEngine,
};
use workgate_infra_engine::SyntheticWorkEngine;
use workgate_infra_http::HttpCallbackTransport;
use workgate_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

/// Fresh in-memory store with the schema applied
pub async fn memory_repo() -> Arc<SqliteJobRepository> {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool))
}

/// Unique on-disk database path under the system temp dir
pub fn temp_db_path(label: &str) -> String {
    std::env::temp_dir()
        .join(format!("workgate-{}-{}.db", label, uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

/// Fast backoff and no address blocking, so callbacks can hit a local mock server
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        block_localhost: false,
        block_private_ips: false,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        backoff_jitter: 0.0,
        callback_timeout_ms: 2_000,
        work_timeout_ms: 5_000,
        ..RuntimeConfig::default()
    }
}

pub fn real_engine() -> Arc<dyn WorkEngine> {
    Arc::new(SyntheticWorkEngine::new(Arc::new(SystemTimeProvider)))
}

pub fn http_transport(config: &RuntimeConfig) -> Arc<dyn CallbackTransport> {
    Arc::new(HttpCallbackTransport::new(config.callback_timeout()).unwrap())
}

pub fn start_runtime(
    config: RuntimeConfig,
    job_repo: Arc<dyn JobRepository>,
    engine: Arc<dyn WorkEngine>,
    transport: Arc<dyn CallbackTransport>,
) -> ComputeRuntime {
    start_runtime_with_resolver(config, job_repo, engine, transport, Arc::new(SystemResolver))
}

pub fn start_runtime_with_resolver(
    config: RuntimeConfig,
    job_repo: Arc<dyn JobRepository>,
    engine: Arc<dyn WorkEngine>,
    transport: Arc<dyn CallbackTransport>,
    resolver: Arc<dyn HostResolver>,
) -> ComputeRuntime {
    ComputeRuntime::start(
        config,
        RuntimeDeps {
            job_repo,
            engine,
            transport,
            resolver,
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
        },
    )
    .unwrap()
}

/// Poll until the job reaches `state`, panicking after `timeout`
pub async fn wait_for_state(
    service: &ComputeService,
    id: &str,
    state: JobState,
    timeout: Duration,
) -> JobView {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = service.get(id).await.unwrap();
        if view.status == state {
            return view;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} stuck in {} (wanted {})",
                id, view.status, state
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
