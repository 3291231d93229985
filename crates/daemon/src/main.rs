//! Workgate - Main Entry Point
//! Composition root: settings, logging, store, runtime, JSON-RPC server

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settings::LogFormat;
use workgate_api_rpc::{RpcServer, RpcServerConfig};
use workgate_core::application::{ComputeRuntime, RuntimeDeps};
use workgate_core::port::{SystemResolver, SystemTimeProvider, UuidProvider};
use workgate_infra_engine::SyntheticWorkEngine;
use workgate_infra_http::HttpCallbackTransport;
use workgate_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "workgate=info";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load settings (before logging: the format is a setting)
    let config = settings::load()?;

    // 2. Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    let otel = telemetry::otel_layer()?;
    let otel_enabled = otel.is_some();

    let registry = tracing_subscriber::registry().with(otel).with(env_filter);
    match config.daemon.log_format {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).init(),
        // Development: human-readable output
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_writer(writer)).init(),
    }

    info!("Workgate v{} starting...", VERSION);
    telemetry::report(otel_enabled);

    // 3. Initialize database
    let db_path = &config.daemon.db_path;
    info!(db_path = %db_path, "Initializing database...");
    if let Some(parent) = Path::new(db_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = create_pool(db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let transport = HttpCallbackTransport::new(config.runtime.callback_timeout())
        .map_err(|e| anyhow::anyhow!("HTTP client setup failed: {}", e))?;
    let deps = RuntimeDeps {
        job_repo: Arc::new(SqliteJobRepository::new(pool.clone())),
        engine: Arc::new(SyntheticWorkEngine::new(time_provider.clone())),
        transport: Arc::new(transport),
        resolver: Arc::new(SystemResolver),
        id_provider: Arc::new(UuidProvider),
        time_provider,
    };

    // 5. Start workers and dispatcher
    let drain_timeout = config.runtime.drain_timeout();
    info!(
        workers = config.runtime.num_workers,
        queue_size = config.runtime.max_queue_size,
        sync_slots = config.runtime.max_sync_concurrency,
        "Starting compute runtime..."
    );
    let runtime = ComputeRuntime::start(config.runtime.clone(), deps)
        .map_err(|e| anyhow::anyhow!("Runtime start failed: {}", e))?;

    // 6. Settle whatever the previous process left behind
    info!("Running restart recovery...");
    if let Err(e) = runtime.recover().await {
        error!(error = %e, "Restart recovery failed");
    }

    // 7. Start JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: config.daemon.rpc_host.clone(),
        port: config.daemon.rpc_port,
    };
    let (addr, rpc_handle) = RpcServer::new(rpc_config, runtime.service())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining...");

    // 9. Graceful shutdown: the RPC server keeps answering (with ShuttingDown
    // for new work) until the drain is over
    let report = runtime.shutdown(drain_timeout).await;
    if report.drained {
        info!("Drain complete");
    } else {
        warn!(
            left_in_queue = report.left_in_queue,
            deliveries_in_flight = report.deliveries_in_flight,
            "Drain deadline reached, remaining work aborted"
        );
    }

    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    rpc_handle.stopped().await;
    pool.close().await;
    telemetry::shutdown();

    info!("Shutdown complete.");
    Ok(())
}
