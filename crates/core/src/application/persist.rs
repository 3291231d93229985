// Lifecycle writes that must not be dropped on a transient store error

use crate::application::worker::constants::{
    PERSIST_RETRY_ATTEMPTS, PERSIST_RETRY_BASE_DELAY, PERSIST_RETRY_MAX_DELAY,
};
use crate::error::Result;
use std::future::Future;
use tracing::warn;

/// Run `write` until it succeeds, retrying transient failures with a short
/// doubling pause. Non-transient errors and the last failure are returned.
pub async fn persist_with_retry<F, Fut>(job_id: &str, what: &'static str, mut write: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut delay = PERSIST_RETRY_BASE_DELAY;
    let mut tries = 1;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && tries < PERSIST_RETRY_ATTEMPTS => {
                warn!(
                    job_id = %job_id,
                    write = what,
                    attempt = tries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(PERSIST_RETRY_MAX_DELAY);
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let calls = AtomicU32::new(0);
        let result = persist_with_retry("job-1", "running", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Database("database is locked".into()))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_tries() {
        let calls = AtomicU32::new(0);
        let result = persist_with_retry("job-1", "succeeded", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Database("disk I/O error".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), PERSIST_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = persist_with_retry("job-1", "delivered", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::InvalidState("queued -> delivered".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
