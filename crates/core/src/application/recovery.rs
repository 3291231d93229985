// Restart recovery: settle jobs a previous process left mid-flight
use crate::application::queue::JobQueue;
use crate::application::worker::constants::INTERRUPTED_BY_RESTART;
use crate::domain::{JobState, Outcome, RequestMode};
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What a recovery pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// `running` jobs marked `failed`
    pub interrupted: usize,
    /// Deferred jobs whose delivery can no longer happen, marked `delivery_failed`
    pub undelivered: usize,
    /// Immediate jobs that never ran, marked `failed`
    pub abandoned: usize,
    /// Deferred `queued` jobs handed back to the queue
    pub requeued: usize,
    /// Deferred `queued` jobs that did not fit and stay `queued`
    pub left_queued: usize,
}

/// Crash recovery service
///
/// Computation is never resumed: whatever was running is reported as
/// interrupted, and only deferred jobs that never started are re-admitted.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(job_repo: Arc<dyn JobRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            job_repo,
            time_provider,
        }
    }

    /// Run once at startup, before admissions open
    ///
    /// Order matters: interrupted deferred jobs become `failed` first and are
    /// then swept into `delivery_failed` together with undelivered ones.
    pub async fn recover(&self, queue: &JobQueue) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let interrupted = Outcome::Failed(INTERRUPTED_BY_RESTART.to_string());

        info!("Starting restart recovery");

        for job in self.job_repo.find_by_state(JobState::Running).await? {
            warn!(job_id = %job.id, mode = %job.mode, "Job was running at shutdown, marking failed");
            self.job_repo
                .update_state(
                    &job.id,
                    JobState::Failed,
                    Some(&interrupted),
                    self.time_provider.now_millis(),
                )
                .await?;
            report.interrupted += 1;
        }

        for state in [JobState::Succeeded, JobState::Failed, JobState::Delivering] {
            for job in self.job_repo.find_by_state(state).await? {
                if job.mode != RequestMode::Deferred {
                    continue;
                }
                warn!(job_id = %job.id, state = %state, "Undelivered job, marking delivery_failed");
                self.job_repo
                    .record_delivery_attempt(&job.id, job.delivery_attempts, Some(INTERRUPTED_BY_RESTART))
                    .await?;
                self.job_repo
                    .update_state(
                        &job.id,
                        JobState::DeliveryFailed,
                        None,
                        self.time_provider.now_millis(),
                    )
                    .await?;
                report.undelivered += 1;
            }
        }

        for job in self.job_repo.find_by_state(JobState::Queued).await? {
            match job.mode {
                RequestMode::Immediate => {
                    self.job_repo
                        .update_state(
                            &job.id,
                            JobState::Failed,
                            Some(&interrupted),
                            self.time_provider.now_millis(),
                        )
                        .await?;
                    report.abandoned += 1;
                }
                RequestMode::Deferred => match queue.try_reserve() {
                    Ok(slot) => {
                        slot.send(job);
                        report.requeued += 1;
                    }
                    Err(rejection) => {
                        warn!(job_id = %job.id, reason = %rejection, "Job not re-queued, stays queued");
                        report.left_queued += 1;
                    }
                },
            }
        }

        info!(
            interrupted = report.interrupted,
            undelivered = report.undelivered,
            abandoned = report.abandoned,
            requeued = report.requeued,
            left_queued = report.left_queued,
            "Restart recovery complete"
        );
        Ok(report)
    }
}
