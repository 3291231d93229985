// Synthetic work engine
// Runs the kernels on the blocking pool; dropping the execute future cancels the kernel
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::kernels;
use workgate_core::application::execution::panic_message;
use workgate_core::domain::WorkPayload;
use workgate_core::port::{ComputationError, TimeProvider, WorkEngine};

/// Raises the cancel flag when the owning future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// `hash` / `prime` / `matrix` / `transform` kernels behind the `WorkEngine` port
pub struct SyntheticWorkEngine {
    time_provider: Arc<dyn TimeProvider>,
}

impl SyntheticWorkEngine {
    /// # Arguments
    /// * `time_provider` - Time provider for duration tracking
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }
}

#[async_trait]
impl WorkEngine for SyntheticWorkEngine {
    async fn execute(
        &self,
        payload: &WorkPayload,
    ) -> Result<serde_json::Value, ComputationError> {
        let start_time = self.time_provider.now_millis();
        let operation = payload.operation;
        let complexity = payload.complexity.level();

        debug!(operation = %operation, complexity, "Starting kernel");

        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let owned = payload.clone();

        let joined =
            tokio::task::spawn_blocking(move || kernels::run(&owned, &cancel)).await;

        let result = match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let panic_msg = panic_message(join_err.into_panic());
                error!(operation = %operation, panic_msg = %panic_msg, "Kernel panicked");
                Err(ComputationError::Panicked(panic_msg))
            }
            Err(_) => Err(ComputationError::Cancelled),
        };

        let duration_ms = self.time_provider.now_millis() - start_time;
        info!(
            operation = %operation,
            complexity,
            duration_ms,
            ok = result.is_ok(),
            "Kernel finished"
        );

        result
    }
}
