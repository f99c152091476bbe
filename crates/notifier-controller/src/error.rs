//! Error types for the notification controller.
//!
//! Two layers:
//!
//! - [`Error`]: infrastructure failures (storage, configuration) raised by
//!   accessors, sinks and configuration loading
//! - [`ReconcileError`]: the outcome of a failed reconcile invocation, reported
//!   to the scheduler. Every variant is retryable and scoped to one run; none
//!   is fatal to the process.

use crate::extract::ExtractionError;
use crate::notify::NotifyError;

/// The result type used throughout notifier-controller.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Configuration was missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from notifier-core.
    #[error("core error: {0}")]
    Core(#[from] notifier_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Why a reconcile invocation failed.
///
/// None of these leave the run in a state the reconcile table cannot reach;
/// the scheduler should requeue the run (see
/// [`Reconciler::error_policy`](crate::engine::Reconciler::error_policy)).
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The succeeded run's results could not be extracted.
    #[error("result extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// The sink did not accept the notification.
    #[error("notification dispatch failed: {0}")]
    Notify(#[from] NotifyError),

    /// Every conditional write attempt hit a concurrent modification.
    #[error("gave up after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        /// Number of writes attempted.
        attempts: u32,
    },

    /// The run accessor failed.
    #[error("run accessor failed: {0}")]
    Store(#[from] Error),

    /// The scheduler's deadline expired before the invocation finished.
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Returns the error kind as a label (for metrics).
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::Notify(NotifyError::Transport { .. }) => "transport",
            Self::Notify(NotifyError::Rejected { .. }) => "rejected",
            Self::ConflictRetriesExhausted { .. } => "conflict",
            Self::Store(_) => "store",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if retrying without external correction is unlikely to help.
    #[must_use]
    pub const fn needs_correction(&self) -> bool {
        matches!(
            self,
            Self::Extraction(_) | Self::Notify(NotifyError::Rejected { .. })
        )
    }
}
