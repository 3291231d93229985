// Central Error Type for the Application

use thiserror::Error;

/// Admission-time rejections. Always surfaced to the caller, never retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejected {
    #[error("Rate limit exceeded. Try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    #[error("Queue is full (capacity {capacity}). Please try again later.")]
    QueueFull { capacity: usize },

    #[error("Service busy: all {capacity} immediate slots are in use")]
    Busy { capacity: usize },

    #[error("Service is shutting down")]
    ShuttingDown,
}

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionRejected),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Computation error: {0}")]
    Computation(#[from] crate::port::ComputationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::port::DeliveryError),

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Admission rejection carried by this error, if any
    pub fn admission(&self) -> Option<&AdmissionRejected> {
        match self {
            AppError::Admission(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Store failures that may clear up on their own (busy, locked, I/O).
    /// Illegal transitions and unknown ids never do.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
