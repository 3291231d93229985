// Port Layer - Interfaces for external collaborators

pub mod callback_transport;
pub mod host_resolver;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod time_provider;
pub mod work_engine;

// Re-exports
pub use callback_transport::{CallbackPayload, CallbackReceipt, CallbackTransport, DeliveryError};
pub use host_resolver::{HostResolver, SystemResolver};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_repository::{JobFilter, JobPage, JobRepository, StoreMetrics};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use work_engine::{ComputationError, WorkEngine};
