//! HTTP webhook sink.
//!
//! Delivers a [`NotificationPayload`] as `POST {url}` with a JSON body. The
//! payload fingerprint is sent as the `Idempotency-Key` header so receivers
//! can drop redeliveries.
//!
//! Status mapping:
//!
//! | Response                         | Result                     |
//! |----------------------------------|----------------------------|
//! | 2xx                              | delivered                  |
//! | 408, 429, 5xx                    | [`NotifyError::Transport`] |
//! | other 4xx / unexpected statuses  | [`NotifyError::Rejected`]  |
//! | connect failure, timeout         | [`NotifyError::Transport`] |
//!
//! ## Example
//!
//! ```rust,no_run
//! use notifier_controller::notify::webhook::{WebhookConfig, WebhookSink};
//!
//! # fn main() -> notifier_controller::error::Result<()> {
//! let sink = WebhookSink::new(WebhookConfig::new("https://hooks.example.com/runs"))?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use notifier_core::Redacted;

use super::{NotificationPayload, NotificationSink, NotifyError};
use crate::error::{Error, Result};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_ERROR_BODY_BYTES: usize = 512;

/// Configuration for [`WebhookSink`].
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Endpoint receiving the POST.
    pub url: String,
    /// Optional bearer token sent in the `Authorization` header.
    pub bearer_token: Option<Redacted<String>>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Attempts per delivery for transport failures (at least 1).
    pub max_attempts: u32,
}

impl WebhookConfig {
    /// Creates a config with default timeouts and no authentication.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(Redacted::new(token.into()));
        self
    }

    /// Sets the whole-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the number of attempts for transport failures.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Sink that POSTs payloads to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    config: WebhookConfig,
}

impl WebhookSink {
    /// Creates a webhook sink.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is not an absolute `http(s)`
    /// URL or the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.url)
            .map_err(|e| Error::configuration(format!("invalid webhook URL: {e}")))?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "webhook URL must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        if config.max_attempts == 0 {
            return Err(Error::configuration(
                "webhook max_attempts must be greater than zero",
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    async fn attempt(&self, payload: &NotificationPayload) -> std::result::Result<(), NotifyError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_KEY_HEADER, &payload.fingerprint)
            .json(payload);

        if let Some(token) = self.config.bearer_token.as_ref() {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                NotifyError::transport(format!("webhook request timed out: {err}"))
            } else {
                NotifyError::transport(format!("webhook request failed: {err}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = truncate_body(response.text().await.unwrap_or_default());
        if is_transient(status) {
            Err(NotifyError::transport(format!(
                "webhook unavailable (status={status}): {body}"
            )))
        } else {
            Err(NotifyError::rejected(Some(status.as_u16()), body))
        }
    }
}

/// Caps a response body kept for errors and logs at a char boundary.
fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, payload: &NotificationPayload) -> std::result::Result<(), NotifyError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(payload).await {
                Ok(()) => return Ok(()),
                Err(err @ NotifyError::Transport { .. }) if attempt < self.config.max_attempts => {
                    tracing::debug!(attempt, error = %err, "retrying webhook delivery");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(WebhookSink::new(WebhookConfig::new("not a url")).is_err());
        assert!(WebhookSink::new(WebhookConfig::new("ftp://example.com/hook")).is_err());
        assert!(WebhookSink::new(WebhookConfig::new("https://example.com/hook")).is_ok());
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = WebhookConfig::new("https://example.com/hook").with_max_attempts(0);
        assert!(WebhookSink::new(config).is_err());
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn long_bodies_are_truncated() {
        assert_eq!(truncate_body("invalid result".to_string()), "invalid result");

        let long = "x".repeat(MAX_ERROR_BODY_BYTES * 4);
        let truncated = truncate_body(long);
        assert_eq!(truncated.len(), MAX_ERROR_BODY_BYTES + 3);
        assert!(truncated.ends_with("..."));

        // Multi-byte characters straddling the limit are dropped whole.
        let wide = format!("x{}", "é".repeat(MAX_ERROR_BODY_BYTES));
        let truncated = truncate_body(wide);
        assert_eq!(truncated.len(), MAX_ERROR_BODY_BYTES - 1 + 3);
        let kept = truncated.trim_end_matches("...").trim_start_matches('x');
        assert!(kept.chars().all(|c| c == 'é'));
    }

    #[test]
    fn config_debug_redacts_token() {
        let config = WebhookConfig::new("https://example.com/hook").with_bearer_token("s3cr3t");
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("[REDACTED]"));
    }
}
