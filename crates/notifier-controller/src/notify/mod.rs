//! Notification dispatch.
//!
//! This module provides:
//!
//! - [`NotificationPayload`]: the structured body delivered to the sink
//! - [`NotificationSink`]: trait for delivering payloads to an external system
//! - [`NotificationDispatcher`]: formats a payload and hands it to the sink
//! - [`webhook::WebhookSink`]: HTTP POST delivery
//! - [`memory::InMemorySink`]: recording sink for testing
//!
//! Delivery is at-least-once. A crash between a successful delivery and the
//! marker write causes a second delivery of the same payload; sinks that need
//! exactly-once behaviour deduplicate on [`NotificationPayload::fingerprint`].

pub mod memory;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use notifier_core::RunKey;

use crate::metrics::ControllerMetrics;
use crate::run::RunResult;

/// Body delivered to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Identity of the run the results belong to.
    pub run: RunKey,
    /// Ordered result sequence.
    pub results: Vec<RunResult>,
    /// Stable digest of `run` and `results`; identical for redeliveries.
    pub fingerprint: String,
    /// When this delivery attempt was formatted.
    pub dispatched_at: DateTime<Utc>,
}

impl NotificationPayload {
    /// Creates a payload for the given run and results.
    #[must_use]
    pub fn new(run: RunKey, results: Vec<RunResult>) -> Self {
        let fingerprint = compute_fingerprint(&run, &results);
        Self {
            run,
            results,
            fingerprint,
            dispatched_at: Utc::now(),
        }
    }
}

/// Computes the payload fingerprint.
///
/// Fields are length-prefixed so that no two distinct inputs share an encoding.
#[must_use]
pub fn compute_fingerprint(run: &RunKey, results: &[RunResult]) -> String {
    let mut hasher = Sha256::new();
    let mut field = |value: &str| {
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    };
    field(run.namespace());
    field(run.name());
    for result in results {
        field(&result.name);
        field(&result.value);
    }
    hex::encode(hasher.finalize())
}

/// Errors returned by a sink delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The sink was unreachable or temporarily unavailable.
    #[error("sink transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The sink explicitly rejected the payload.
    ///
    /// Retrying without correcting the payload will not succeed.
    #[error("sink rejected payload{}: {message}", status_suffix(.status))]
    Rejected {
        /// Status code returned by the sink, if it has one.
        status: Option<u16>,
        /// Description of the rejection.
        message: String,
    },
}

impl NotifyError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the sink rejected the payload.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns the error kind as a label (for metrics).
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport_error",
            Self::Rejected { .. } => "rejected",
        }
    }
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status={s})")).unwrap_or_default()
}

/// Destination for notification payloads.
///
/// Implementations may target:
/// - HTTP webhooks
/// - Message queues
/// - In-memory recorders (for testing)
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; one sink is shared by every concurrent
/// reconcile.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers a payload.
    ///
    /// Returns `Ok(())` only once the sink has accepted the payload.
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;

    /// Returns the sink's name (for logs).
    fn sink_name(&self) -> &str;
}

/// Formats run results and hands them to a [`NotificationSink`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    metrics: ControllerMetrics,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sink", &self.sink.sink_name())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Creates a dispatcher for the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Returns the sink's name.
    #[must_use]
    pub fn sink_name(&self) -> &str {
        self.sink.sink_name()
    }

    /// Delivers the results of `run` to the sink.
    ///
    /// # Errors
    ///
    /// Returns the sink's [`NotifyError`] unchanged.
    pub async fn dispatch(&self, run: &RunKey, results: &[RunResult]) -> Result<(), NotifyError> {
        let payload = NotificationPayload::new(run.clone(), results.to_vec());

        match self.sink.deliver(&payload).await {
            Ok(()) => {
                self.metrics.record_notification("delivered");
                tracing::info!(
                    sink = self.sink.sink_name(),
                    fingerprint = %payload.fingerprint,
                    results = payload.results.len(),
                    "notification delivered"
                );
                Ok(())
            }
            Err(err) => {
                self.metrics.record_notification(err.as_label());
                if err.is_rejected() {
                    tracing::error!(
                        sink = self.sink.sink_name(),
                        fingerprint = %payload.fingerprint,
                        error = %err,
                        "sink rejected notification payload"
                    );
                } else {
                    tracing::warn!(
                        sink = self.sink.sink_name(),
                        error = %err,
                        "notification delivery failed"
                    );
                }
                Err(err)
            }
        }
    }
}
