//! Callback Dispatcher
//!
//! Each finished deferred job gets its own detached task. Attempts for one
//! job run strictly in sequence; different jobs never wait on each other.
//! Every attempt is persisted before the next decision is made.

use crate::application::execution::panic_message;
use crate::application::persist::persist_with_retry;
use crate::application::retry::{DeliveryRetryPolicy, RetryDecision};
use crate::application::worker::constants::INTERRUPTED_BY_SHUTDOWN;
use crate::application::worker::ShutdownToken;
use crate::domain::{Job, JobId, JobState};
use crate::port::{CallbackPayload, CallbackTransport, DeliveryError, JobRepository, TimeProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub struct CallbackDispatcher {
    job_repo: Arc<dyn JobRepository>,
    transport: Arc<dyn CallbackTransport>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: DeliveryRetryPolicy,
    attempt_timeout: Duration,
    shutdown: ShutdownToken,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Counts one detached delivery; wakes `wait_idle` when the last one ends
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl InFlightGuard {
    fn new(in_flight: &Arc<AtomicUsize>, idle: &Arc<Notify>) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight: Arc::clone(in_flight),
            idle: Arc::clone(idle),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl CallbackDispatcher {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        transport: Arc<dyn CallbackTransport>,
        time_provider: Arc<dyn TimeProvider>,
        retry_policy: DeliveryRetryPolicy,
        attempt_timeout: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            job_repo,
            transport,
            time_provider,
            retry_policy,
            attempt_timeout,
            shutdown,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Hand a computed job over to a detached delivery task
    pub fn dispatch(self: &Arc<Self>, job: Job) {
        self.spawn_delivery(job, None);
    }

    /// Hand over a job whose outcome the worker could not persist. The outcome
    /// write is retried on the delivery schedule before delivery starts.
    pub fn dispatch_unsettled(self: &Arc<Self>, job: Job, completed_at: i64) {
        self.spawn_delivery(job, Some(completed_at));
    }

    fn spawn_delivery(self: &Arc<Self>, job: Job, unsettled_at: Option<i64>) {
        let guard = InFlightGuard::new(&self.in_flight, &self.idle);
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let _guard = guard;
            let job_id = job.id.clone();
            let attempts = job.delivery_attempts;

            let inner = Arc::clone(&dispatcher);
            let result = tokio::spawn(async move {
                if let Some(completed_at) = unsettled_at {
                    if !inner.settle(&job, completed_at).await {
                        return JobState::Running;
                    }
                }
                inner.deliver(job).await
            })
            .await;

            match result {
                Ok(_) => {}
                Err(join_err) if join_err.is_panic() => {
                    let panic_msg = panic_message(join_err.into_panic());
                    error!(job_id = %job_id, panic_msg = %panic_msg, "Delivery task panicked");
                    let attempts = dispatcher.persisted_attempts(&job_id, attempts).await;
                    dispatcher
                        .finish_failed(&job_id, attempts, &format!("delivery panicked: {}", panic_msg))
                        .await;
                }
                Err(_) => warn!(job_id = %job_id, "Delivery task cancelled"),
            }
        });
    }

    /// Persist a computed outcome late. False if the store never took it; the
    /// row then stays `running` and restart recovery settles it.
    async fn settle(&self, job: &Job, completed_at: i64) -> bool {
        let mut shutdown = self.shutdown.clone();
        let mut tries = 0;
        loop {
            tries += 1;
            let e = match self
                .job_repo
                .update_state(&job.id, job.state, Some(&job.outcome), completed_at)
                .await
            {
                Ok(()) => {
                    info!(job_id = %job.id, tries, state = %job.state, "Outcome persisted late");
                    return true;
                }
                Err(e) => e,
            };
            // An earlier write may have landed even though it reported an error
            if let Ok(Some(stored)) = self.job_repo.get(&job.id).await {
                if stored.state == job.state {
                    return true;
                }
            }
            match self.retry_policy.decide(tries) {
                RetryDecision::Retry(delay) => {
                    warn!(job_id = %job.id, attempt = tries, error = %e, "Outcome still not persisted");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait() => return false,
                    }
                }
                RetryDecision::GiveUp => {
                    error!(
                        job_id = %job.id,
                        error = %e,
                        "Outcome could not be persisted, left for restart recovery"
                    );
                    return false;
                }
            }
        }
    }

    /// Deliver one job's outcome, retrying with backoff. Returns the terminal
    /// state reached; store errors along the way are logged, never returned.
    pub async fn deliver(&self, job: Job) -> JobState {
        let Some(url) = job.callback_url.clone() else {
            warn!(job_id = %job.id, "Computed job has no callback target, skipping delivery");
            return job.state;
        };

        let now = self.time_provider.now_millis();
        if let Err(e) = persist_with_retry(&job.id, "delivering", || {
            self.job_repo
                .update_state(&job.id, JobState::Delivering, None, now)
        })
        .await
        {
            error!(job_id = %job.id, error = %e, "Could not start delivery");
            self.finish_failed(&job.id, job.delivery_attempts, &format!("store unavailable: {}", e))
                .await;
            return JobState::DeliveryFailed;
        }

        let payload = CallbackPayload::from_job(&job);
        let mut attempts = job.delivery_attempts;
        let mut shutdown = self.shutdown.clone();

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.attempt_timeout,
                self.transport.post(&url, &payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.attempt_timeout.as_millis() as u64)),
            };

            match result {
                Ok(receipt) => {
                    self.record_attempt(&job.id, attempts, None).await;
                    let now = self.time_provider.now_millis();
                    match persist_with_retry(&job.id, "delivered", || {
                        self.job_repo
                            .update_state(&job.id, JobState::Delivered, None, now)
                    })
                    .await
                    {
                        Ok(()) => info!(
                            job_id = %job.id,
                            attempt = attempts,
                            status_code = receipt.status_code,
                            duration_ms = receipt.duration_ms,
                            "Callback delivered"
                        ),
                        Err(e) => error!(
                            job_id = %job.id,
                            attempt = attempts,
                            error = %e,
                            "Callback delivered but the delivered state was not persisted"
                        ),
                    }
                    return JobState::Delivered;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.record_attempt(&job.id, attempts, Some(&message)).await;

                    match self.retry_policy.decide(attempts) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                job_id = %job.id,
                                attempt = attempts,
                                max_attempts = self.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis() as u64,
                                error = %message,
                                "Callback attempt failed, retrying"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.wait() => {
                                    self.finish_failed(&job.id, attempts, INTERRUPTED_BY_SHUTDOWN).await;
                                    return JobState::DeliveryFailed;
                                }
                            }
                        }
                        RetryDecision::GiveUp => {
                            let now = self.time_provider.now_millis();
                            if let Err(e) = persist_with_retry(&job.id, "delivery_failed", || {
                                self.job_repo
                                    .update_state(&job.id, JobState::DeliveryFailed, None, now)
                            })
                            .await
                            {
                                error!(job_id = %job.id, error = %e, "Could not record delivery failure");
                            }
                            error!(
                                job_id = %job.id,
                                attempts = attempts,
                                error = %message,
                                "Callback delivery failed permanently"
                            );
                            return JobState::DeliveryFailed;
                        }
                    }
                }
            }
        }
    }

    /// Attempt counters are bookkeeping only; delivery goes on if they cannot be written
    async fn record_attempt(&self, job_id: &JobId, attempts: u32, error: Option<&str>) {
        let recorded = persist_with_retry(job_id, "delivery attempt", || {
            self.job_repo.record_delivery_attempt(job_id, attempts, error)
        })
        .await;
        if let Err(e) = recorded {
            warn!(job_id = %job_id, attempt = attempts, error = %e, "Delivery attempt not recorded");
        }
    }

    /// Latest stored attempt count, never lower than what the caller knew
    async fn persisted_attempts(&self, job_id: &str, known: u32) -> u32 {
        match self.job_repo.get(&job_id.to_string()).await {
            Ok(Some(job)) => job.delivery_attempts.max(known),
            _ => known,
        }
    }

    async fn finish_failed(&self, job_id: &str, attempts: u32, reason: &str) {
        let id = job_id.to_string();
        let now = self.time_provider.now_millis();
        let recorded = async {
            persist_with_retry(job_id, "delivery attempt", || {
                self.job_repo.record_delivery_attempt(&id, attempts, Some(reason))
            })
            .await?;
            persist_with_retry(job_id, "delivery_failed", || {
                self.job_repo
                    .update_state(&id, JobState::DeliveryFailed, None, now)
            })
            .await
        };
        if let Err(e) = recorded.await {
            error!(job_id = %job_id, error = %e, "Failed to record delivery failure");
        }
    }

    /// Deliveries currently running (including backoff waits)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no delivery is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
