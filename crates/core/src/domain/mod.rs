// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod payload;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobState, Outcome, RequestMode};
pub use payload::{Complexity, Operation, WorkPayload};
