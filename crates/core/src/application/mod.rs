// Application Layer - Use Cases and Business Logic

pub mod callback_url;
pub mod config;
pub mod dispatcher;
pub mod execution;
pub mod gate;
pub mod persist;
pub mod queue;
pub mod rate_limiter;
pub mod recovery;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod worker;

// Re-exports
pub use callback_url::{CallbackUrlPolicy, CallbackUrlValidator};
pub use config::RuntimeConfig;
pub use dispatcher::CallbackDispatcher;
pub use gate::{GateMetrics, GatePermit, ImmediateGate};
pub use queue::{JobQueue, QueueMetrics};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{DeliveryRetryPolicy, RetryDecision};
pub use runtime::{ComputeRuntime, RuntimeDeps, ShutdownReport};
pub use service::{
    Accepted, ComputeService, HealthReport, ImmediateResponse, JobListView, JobView,
    ServiceMetrics,
};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerMetrics, WorkerPool};
