//! Controller configuration.
//!
//! Loaded from the process environment with strict validation. Every value has
//! a default except the webhook URL, which is only needed when the webhook
//! sink is built.

use std::time::Duration;

use notifier_core::LogFormat;

use crate::error::{Error, Result};
use crate::notify::webhook::WebhookConfig;
use crate::state::{DEFAULT_GUARD_TOKEN, DEFAULT_MARKER_KEY, DEFAULT_MARKER_VALUE, Markers};

const ENV_GUARD_TOKEN: &str = "NOTIFIER_GUARD_TOKEN";
const ENV_MARKER_KEY: &str = "NOTIFIER_MARKER_KEY";
const ENV_MARKER_VALUE: &str = "NOTIFIER_MARKER_VALUE";
const ENV_MAX_CONFLICT_RETRIES: &str = "NOTIFIER_MAX_CONFLICT_RETRIES";
const ENV_RETRY_BACKOFF_SECS: &str = "NOTIFIER_RETRY_BACKOFF_SECS";
const ENV_REJECTED_BACKOFF_SECS: &str = "NOTIFIER_REJECTED_BACKOFF_SECS";
const ENV_WEBHOOK_URL: &str = "NOTIFIER_WEBHOOK_URL";
const ENV_WEBHOOK_TOKEN: &str = "NOTIFIER_WEBHOOK_TOKEN";
const ENV_WEBHOOK_TIMEOUT_SECS: &str = "NOTIFIER_WEBHOOK_TIMEOUT_SECS";
const ENV_LOG_FORMAT: &str = "NOTIFIER_LOG_FORMAT";

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 30;
const DEFAULT_REJECTED_BACKOFF_SECS: u64 = 300;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Configuration for the notification controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Guard Token and Notification Marker literals.
    pub markers: Markers,
    /// Re-fetch budget after conditional-write conflicts, per invocation.
    pub max_conflict_retries: u32,
    /// Requeue delay after a retryable failure.
    pub retry_backoff: Duration,
    /// Requeue delay after the sink rejected a payload.
    pub rejected_backoff: Duration,
    /// Webhook sink settings, if a webhook URL is configured.
    pub webhook: Option<WebhookConfig>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            markers: Markers::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            rejected_backoff: Duration::from_secs(DEFAULT_REJECTED_BACKOFF_SECS),
            webhook: None,
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is empty, not a valid
    /// integer, or out of range.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is empty, not a valid
    /// integer, or out of range.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let markers = Markers {
            guard_token: non_empty_env(&get_env, ENV_GUARD_TOKEN, DEFAULT_GUARD_TOKEN)?,
            marker_key: non_empty_env(&get_env, ENV_MARKER_KEY, DEFAULT_MARKER_KEY)?,
            marker_value: non_empty_env(&get_env, ENV_MARKER_VALUE, DEFAULT_MARKER_VALUE)?,
        };

        let max_conflict_retries = match get_env(ENV_MAX_CONFLICT_RETRIES) {
            None => DEFAULT_MAX_CONFLICT_RETRIES,
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                Error::configuration(format!(
                    "{ENV_MAX_CONFLICT_RETRIES} must be a non-negative integer, got '{raw}'"
                ))
            })?,
        };

        let retry_backoff = Duration::from_secs(parse_positive_u64_env(
            &get_env,
            ENV_RETRY_BACKOFF_SECS,
            DEFAULT_RETRY_BACKOFF_SECS,
        )?);
        let rejected_backoff = Duration::from_secs(parse_positive_u64_env(
            &get_env,
            ENV_REJECTED_BACKOFF_SECS,
            DEFAULT_REJECTED_BACKOFF_SECS,
        )?);

        let webhook = match get_env(ENV_WEBHOOK_URL) {
            None => None,
            Some(url) if url.trim().is_empty() => {
                return Err(Error::configuration(format!(
                    "{ENV_WEBHOOK_URL} must not be empty"
                )));
            }
            Some(url) => {
                let timeout = parse_positive_u64_env(
                    &get_env,
                    ENV_WEBHOOK_TIMEOUT_SECS,
                    DEFAULT_WEBHOOK_TIMEOUT_SECS,
                )?;
                let mut webhook =
                    WebhookConfig::new(url).with_request_timeout(Duration::from_secs(timeout));
                if let Some(token) = get_env(ENV_WEBHOOK_TOKEN).filter(|t| !t.is_empty()) {
                    webhook = webhook.with_bearer_token(token);
                }
                Some(webhook)
            }
        };

        let log_format = match get_env(ENV_LOG_FORMAT) {
            None => LogFormat::default(),
            Some(raw) => raw.parse::<LogFormat>()?,
        };

        Ok(Self {
            markers,
            max_conflict_retries,
            retry_backoff,
            rejected_backoff,
            webhook,
            log_format,
        })
    }

    /// Returns the webhook settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no webhook URL was configured.
    pub fn require_webhook(&self) -> Result<&WebhookConfig> {
        self.webhook
            .as_ref()
            .ok_or_else(|| Error::configuration(format!("missing {ENV_WEBHOOK_URL}")))
    }
}

fn non_empty_env<F>(get_env: &F, key: &str, default: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(default.to_string()),
        Some(value) if value.is_empty() => Err(Error::configuration(format!(
            "{key} must not be empty"
        ))),
        Some(value) => Ok(value),
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
