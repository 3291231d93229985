//! HTTP callback transport
//!
//! One POST per call: JSON body, per-attempt timeout, redirects never followed.
//! Anything outside 2xx is reported as `DeliveryError::Status`; retrying is the
//! dispatcher's business.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use workgate_core::error::{AppError, Result};
use workgate_core::port::{CallbackPayload, CallbackReceipt, CallbackTransport, DeliveryError};

/// Response bodies longer than this are cut before landing in `delivery_error`
const MAX_ERROR_BODY_CHARS: usize = 512;

const USER_AGENT: &str = concat!("workgate-callback/", env!("CARGO_PKG_VERSION"));

pub struct HttpCallbackTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCallbackTransport {
    /// Build a client with the given per-attempt timeout
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post(
        &self,
        url: &str,
        payload: &CallbackPayload,
    ) -> std::result::Result<CallbackReceipt, DeliveryError> {
        let start = Instant::now();

        let response = match self.client.post(url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, duration_ms = start.elapsed().as_millis() as u64, "Callback request failed: {}", e);
                if e.is_timeout() {
                    return Err(DeliveryError::Timeout(self.timeout.as_millis() as u64));
                }
                return Err(DeliveryError::Network(e.to_string()));
            }
        };

        let status = response.status();
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(url = %url, status = status.as_u16(), duration_ms, "Callback response");

        if status.is_success() {
            return Ok(CallbackReceipt {
                status_code: status.as_u16(),
                duration_ms,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: truncate(body),
        })
    }
}
