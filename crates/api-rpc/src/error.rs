//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes. Every admission rejection
//! gets its own code so callers can tell "slow down" from "server is full".

use jsonrpsee::types::ErrorObjectOwned;
use serde_json::json;
use workgate_core::error::{AdmissionRejected, AppError};

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const RATE_LIMITED: i32 = 4290;
    pub const QUEUE_FULL: i32 = 4291;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const BUSY: i32 = 5030;
    pub const SHUTTING_DOWN: i32 = 5031;
}

fn admission_error(rejection: AdmissionRejected) -> ErrorObjectOwned {
    let msg = rejection.to_string();
    match rejection {
        AdmissionRejected::RateLimited { retry_after_secs } => ErrorObjectOwned::owned(
            code::RATE_LIMITED,
            msg,
            Some(json!({ "retry_after_secs": retry_after_secs })),
        ),
        AdmissionRejected::QueueFull { capacity } => ErrorObjectOwned::owned(
            code::QUEUE_FULL,
            msg,
            Some(json!({ "capacity": capacity })),
        ),
        AdmissionRejected::Busy { capacity } => {
            ErrorObjectOwned::owned(code::BUSY, msg, Some(json!({ "capacity": capacity })))
        }
        AdmissionRejected::ShuttingDown => {
            ErrorObjectOwned::owned(code::SHUTTING_DOWN, msg, None::<()>)
        }
    }
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Admission(rejection) => admission_error(rejection),
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::Domain(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Computation(e) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, e.to_string(), None::<()>)
        }
        AppError::Delivery(e) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, e.to_string(), None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_codes_are_distinct() {
        let cases = [
            (
                AdmissionRejected::RateLimited { retry_after_secs: 7 },
                code::RATE_LIMITED,
            ),
            (AdmissionRejected::QueueFull { capacity: 100 }, code::QUEUE_FULL),
            (AdmissionRejected::Busy { capacity: 10 }, code::BUSY),
            (AdmissionRejected::ShuttingDown, code::SHUTTING_DOWN),
        ];
        for (rejection, expected) in cases {
            assert_eq!(to_rpc_error(rejection.into()).code(), expected);
        }
    }

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let err = to_rpc_error(AdmissionRejected::RateLimited { retry_after_secs: 7 }.into());
        let data: serde_json::Value =
            serde_json::from_str(err.data().unwrap().get()).unwrap();
        assert_eq!(data["retry_after_secs"], 7);
    }

    #[test]
    fn test_other_mappings() {
        assert_eq!(
            to_rpc_error(AppError::Validation("x".into())).code(),
            code::VALIDATION_ERROR
        );
        assert_eq!(to_rpc_error(AppError::NotFound("x".into())).code(), code::NOT_FOUND);
        assert_eq!(to_rpc_error(AppError::InvalidState("x".into())).code(), code::CONFLICT);
        assert_eq!(to_rpc_error(AppError::Database("x".into())).code(), code::DB_ERROR);
        assert_eq!(
            to_rpc_error(AppError::Internal("x".into())).code(),
            code::INTERNAL_ERROR
        );
    }
}
