// Callback Transport Port
// Outbound HTTP POST of a deferred job's terminal outcome

use crate::domain::{Job, JobId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body POSTed to the callback target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub request_id: JobId,
    /// `succeeded` or `failed`
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub completed_at: Option<i64>,
}

impl CallbackPayload {
    /// Build the body from a job whose compute phase has finished
    pub fn from_job(job: &Job) -> Self {
        let status = if job.outcome.error().is_some() {
            "failed"
        } else {
            "succeeded"
        };
        Self {
            request_id: job.id.clone(),
            status: status.to_string(),
            result: job.outcome.result().cloned(),
            error: job.outcome.error().map(str::to_string),
            execution_time_ms: job.execution_time_ms(),
            completed_at: job.completed_at,
        }
    }
}

/// Successful (2xx) delivery
#[derive(Debug, Clone)]
pub struct CallbackReceipt {
    pub status_code: u16,
    pub duration_ms: u64,
}

/// Delivery errors (all retryable up to the configured attempt cap)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Request error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Callback Transport trait
///
/// Implementations must treat every non-2xx response as `DeliveryError::Status`
/// and must not follow redirects.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &CallbackPayload,
    ) -> std::result::Result<CallbackReceipt, DeliveryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted response for one POST
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Status(u16),
        NetworkError(String),
        /// Sleep before answering 200
        Slow(Duration),
        /// Panic inside the transport call
        Panic,
    }

    /// Records every POST; replies from a script, falling back to a default
    pub struct MockCallbackTransport {
        script: Mutex<VecDeque<MockReply>>,
        fallback: MockReply,
        posts: Mutex<Vec<(String, CallbackPayload)>>,
    }

    impl MockCallbackTransport {
        pub fn new(fallback: MockReply) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
                posts: Mutex::new(Vec::new()),
            }
        }

        pub fn always_ok() -> Self {
            Self::new(MockReply::Status(200))
        }

        pub fn always_status(status: u16) -> Self {
            Self::new(MockReply::Status(status))
        }

        /// Replies used in order before falling back
        pub fn with_script(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
            self.script.lock().unwrap().extend(replies);
            self
        }

        pub fn posts(&self) -> Vec<(String, CallbackPayload)> {
            self.posts.lock().unwrap().clone()
        }

        pub fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CallbackTransport for MockCallbackTransport {
        async fn post(
            &self,
            url: &str,
            payload: &CallbackPayload,
        ) -> std::result::Result<CallbackReceipt, DeliveryError> {
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match reply {
                MockReply::Status(code) if (200..300).contains(&code) => Ok(CallbackReceipt {
                    status_code: code,
                    duration_ms: 0,
                }),
                MockReply::Status(code) => Err(DeliveryError::Status {
                    status: code,
                    body: String::new(),
                }),
                MockReply::NetworkError(msg) => Err(DeliveryError::Network(msg)),
                MockReply::Panic => panic!("transport exploded"),
                MockReply::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(CallbackReceipt {
                        status_code: 200,
                        duration_ms: delay.as_millis() as u64,
                    })
                }
            }
        }
    }
}
