use crate::config::{Endpoint, RetryPolicy};
use crate::error::CallError;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

/// Maximum number of bytes of an error body kept for logs.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Request body for a collaborator call.
#[derive(Debug, Clone)]
pub enum CallRequest {
    /// Raw bytes sent as `application/octet-stream` (audio).
    Bytes(Bytes),
    /// A JSON document.
    Json(Value),
}

/// Passed to the retry observer before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// The attempt about to be made (2-based).
    pub next_attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    /// Redacted reason for the previous failure.
    pub reason: String,
}

/// HTTP client for collaborator services.
///
/// Cloning is cheap; clones share one connection pool. Pooled connections are
/// keyed per host, so concurrent calls to different collaborators never share
/// a connection.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl ServiceClient {
    /// # Errors
    ///
    /// Returns the builder error when the HTTP client cannot be initialized
    /// (e.g. the TLS backend fails to load).
    pub fn new(retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("conductor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, retry })
    }

    /// Calls a collaborator, retrying transport failures and 5xx responses.
    pub async fn call(&self, endpoint: &Endpoint, request: CallRequest) -> Result<Value, CallError> {
        self.call_observed(endpoint, request, |_| {}).await
    }

    /// Like [`call`](Self::call), but reports each upcoming retry to `on_retry`.
    pub async fn call_observed<F>(
        &self,
        endpoint: &Endpoint,
        request: CallRequest,
        mut on_retry: F,
    ) -> Result<Value, CallError>
    where
        F: FnMut(&RetryNotice),
    {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 1;

        loop {
            tracing::info!(
                collaborator = %endpoint.collaborator,
                url = %endpoint.url,
                attempt,
                max_attempts,
                "calling collaborator"
            );

            let err = match self.attempt(endpoint, &request, attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::warn!(
                    collaborator = %endpoint.collaborator,
                    url = %endpoint.url,
                    attempt,
                    "permanent collaborator failure: {}",
                    err
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    collaborator = %endpoint.collaborator,
                    url = %endpoint.url,
                    attempts = attempt,
                    "collaborator retries exhausted: {}",
                    err
                );
                return Err(err);
            }

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                collaborator = %endpoint.collaborator,
                url = %endpoint.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retryable collaborator failure: {}",
                err
            );
            on_retry(&RetryNotice {
                next_attempt: attempt + 1,
                max_attempts,
                delay,
                reason: err.summary(),
            });

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        request: &CallRequest,
        attempt: u32,
    ) -> Result<Value, CallError> {
        let collaborator = endpoint.collaborator;
        let builder = self.http.post(&endpoint.url).timeout(endpoint.timeout);
        let builder = match request {
            CallRequest::Bytes(bytes) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            CallRequest::Json(value) => builder.json(value),
        };

        let transport = |e: reqwest::Error| CallError::Transport {
            collaborator,
            attempts: attempt,
            timed_out: e.is_timeout(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(CallError::Status {
                collaborator,
                attempts: attempt,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_slice(&body).map_err(|e| CallError::Decode {
            collaborator,
            attempts: attempt,
            message: e.to_string(),
        })
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
