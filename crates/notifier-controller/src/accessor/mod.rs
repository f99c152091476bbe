//! Run accessor: typed, version-checked access to run records.
//!
//! The [`RunAccessor`] trait is the only way the reconciler reads or writes a
//! run. It wraps the external object store's get and conditional patch.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: every write names the version it was computed from;
//!   a stale version yields [`PatchResult::Conflict`], never a blind overwrite
//! - **Narrow capability**: two operations, agnostic to the concrete store and
//!   record type behind them
//! - **Testability**: in-memory implementation for tests ([`memory::InMemoryRunStore`])

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use notifier_core::RunKey;

use crate::error::Result;
use crate::run::Run;

/// A run together with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The run record.
    pub run: Run,
    /// Opaque store version token for conditional writes.
    pub version: String,
}

/// A single mutation applied by a conditional patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPatch {
    /// Adds a finalizer token (no-op if present).
    AddFinalizer(String),
    /// Removes a finalizer token (no-op if absent).
    RemoveFinalizer(String),
    /// Sets an annotation, overwriting any existing value.
    SetAnnotation {
        /// Annotation key.
        key: String,
        /// Annotation value.
        value: String,
    },
}

impl RunPatch {
    /// Applies the mutation to a run in place.
    pub fn apply(&self, run: &mut Run) {
        match self {
            Self::AddFinalizer(token) => {
                run.metadata.finalizers.insert(token.clone());
            }
            Self::RemoveFinalizer(token) => {
                run.metadata.finalizers.remove(token);
            }
            Self::SetAnnotation { key, value } => {
                run.metadata.annotations.insert(key.clone(), value.clone());
            }
        }
    }

    /// Returns the mutation kind as a label (for logs).
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::AddFinalizer(_) => "add_finalizer",
            Self::RemoveFinalizer(_) => "remove_finalizer",
            Self::SetAnnotation { .. } => "set_annotation",
        }
    }
}

/// Result of a conditional patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    /// The patch was applied.
    Applied {
        /// Version after the write.
        version: String,
    },
    /// The record changed since it was read.
    Conflict {
        /// The version currently stored.
        current_version: String,
    },
    /// The record no longer exists.
    NotFound,
}

impl PatchResult {
    /// Returns true if the patch was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Read and conditional-write access to run records.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`: one accessor is shared by reconciles of
/// unrelated runs executing in parallel.
#[async_trait]
pub trait RunAccessor: Send + Sync {
    /// Fetches the current snapshot of a run.
    ///
    /// Returns `None` if the run does not exist.
    async fn fetch(&self, key: &RunKey) -> Result<Option<Snapshot>>;

    /// Applies `patch` only if the record is still at `expected_version`.
    ///
    /// # Returns
    ///
    /// - `PatchResult::Applied` with the new version on success
    /// - `PatchResult::Conflict` if the stored version differs
    /// - `PatchResult::NotFound` if the run no longer exists
    async fn patch(
        &self,
        key: &RunKey,
        expected_version: &str,
        patch: &RunPatch,
    ) -> Result<PatchResult>;
}

#[async_trait]
impl<T: RunAccessor + ?Sized> RunAccessor for Arc<T> {
    async fn fetch(&self, key: &RunKey) -> Result<Option<Snapshot>> {
        (**self).fetch(key).await
    }

    async fn patch(
        &self,
        key: &RunKey,
        expected_version: &str,
        patch: &RunPatch,
    ) -> Result<PatchResult> {
        (**self).patch(key, expected_version, patch).await
    }
}
