//! Run record model.
//!
//! A [`Run`] is the snapshot of one pipeline execution record as stored by the
//! external object store. Only the fields the reconciler reads or writes are
//! modelled:
//!
//! ```json
//! {
//!   "metadata": {
//!     "namespace": "ci",
//!     "name": "build-1",
//!     "annotations": { "notification.sent": "true" },
//!     "finalizers": ["notification.guard"]
//!   },
//!   "status": {
//!     "completion": "Succeeded",
//!     "results": [{ "name": "output", "value": "42" }]
//!   }
//! }
//! ```
//!
//! `status.results` is kept as raw JSON: the record is produced by another
//! system and its encoding is only validated when results are extracted
//! (see [`crate::extract`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notifier_core::RunKey;

/// Completion state of a run as reported by the pipeline subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Completion {
    /// The run has not finished.
    #[default]
    Pending,
    /// The run finished successfully; results are available.
    Succeeded,
    /// The run finished unsuccessfully.
    Failed,
    /// The pipeline subsystem reported an unrecognised state.
    #[serde(other)]
    Unknown,
}

impl Completion {
    /// Returns the completion as a lowercase label (for logs and metrics).
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One named result produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunResult {
    /// Result name.
    pub name: String,
    /// Result value.
    pub value: String,
}

impl RunResult {
    /// Creates a result pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Record metadata: identity, annotations and finalizers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Stable identity of the record.
    #[serde(flatten)]
    pub key: RunKey,
    /// Annotation map; keys are unique.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Finalizer tokens; a non-empty set blocks deletion by the owner.
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    /// Set when the owner asked for deletion while finalizers were present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
}

/// Status written by the pipeline subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    /// Completion state.
    #[serde(default)]
    pub completion: Completion,
    /// Raw result encoding; present only once the run has succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

/// Snapshot of a run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Record metadata.
    pub metadata: RunMetadata,
    /// Record status.
    #[serde(default)]
    pub status: RunStatus,
}

impl Run {
    /// Creates a pending run with no annotations or finalizers.
    #[must_use]
    pub fn new(key: RunKey) -> Self {
        Self {
            metadata: RunMetadata {
                key,
                annotations: BTreeMap::new(),
                finalizers: BTreeSet::new(),
                deletion_requested_at: None,
            },
            status: RunStatus::default(),
        }
    }

    /// Returns the identity of this run.
    #[must_use]
    pub const fn key(&self) -> &RunKey {
        &self.metadata.key
    }

    /// Returns the completion state.
    #[must_use]
    pub const fn completion(&self) -> Completion {
        self.status.completion
    }

    /// Returns the value of an annotation, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Returns true if the finalizer token is present.
    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata.finalizers.contains(token)
    }

    /// Returns true if the owner has asked for this record to be deleted.
    #[must_use]
    pub const fn is_deletion_requested(&self) -> bool {
        self.metadata.deletion_requested_at.is_some()
    }

    /// Sets the completion state.
    #[must_use]
    pub const fn with_completion(mut self, completion: Completion) -> Self {
        self.status.completion = completion;
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Adds a finalizer token.
    #[must_use]
    pub fn with_finalizer(mut self, token: impl Into<String>) -> Self {
        self.metadata.finalizers.insert(token.into());
        self
    }

    /// Marks the run as succeeded with the given results.
    #[must_use]
    pub fn with_results(mut self, results: &[RunResult]) -> Self {
        self.status.completion = Completion::Succeeded;
        self.status.results = Some(serde_json::json!(results));
        self
    }

    /// Sets the raw result encoding without validation.
    #[must_use]
    pub fn with_raw_results(mut self, raw: serde_json::Value) -> Self {
        self.status.results = Some(raw);
        self
    }
}
