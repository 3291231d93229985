// Guarded execution of one unit of work: hard timeout + panic isolation

use crate::domain::WorkPayload;
use crate::port::{ComputationError, WorkEngine};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Run the engine on its own task so a panic cannot unwind into the caller.
///
/// On timeout the task is aborted (dropping the engine future, which cancels
/// the kernel) and `ComputationError::Timeout` is returned.
pub async fn execute_guarded(
    engine: Arc<dyn WorkEngine>,
    payload: WorkPayload,
    timeout: Duration,
) -> Result<serde_json::Value, ComputationError> {
    let handle = tokio::spawn(async move { engine.execute(&payload).await });
    let abort = handle.abort_handle();

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(panic_msg = %panic_msg, "Work execution panicked");
            Err(ComputationError::Panicked(panic_msg))
        }
        Ok(Err(_)) => Err(ComputationError::Cancelled),
        Err(_) => {
            abort.abort();
            Err(ComputationError::Timeout(timeout.as_millis() as u64))
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
