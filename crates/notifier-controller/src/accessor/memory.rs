//! In-memory run store for testing.
//!
//! This module provides [`InMemoryRunStore`], a thread-safe implementation of
//! [`RunAccessor`] that mimics the owning object store:
//!
//! - Every write takes the next value of a store-wide version counter
//!   (exposed as a string), so versions are never reused
//! - Conditional patches fail with [`PatchResult::Conflict`] on a stale version
//! - Deletion is blocked by finalizers: [`InMemoryRunStore::request_delete`]
//!   only marks the record, and removing the last finalizer completes it
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no watch feed
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use notifier_core::RunKey;

use super::{PatchResult, RunAccessor, RunPatch, Snapshot};
use crate::error::{Error, Result};
use crate::run::Run;

#[derive(Debug, Clone)]
struct StoredRun {
    run: Run,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    runs: HashMap<RunKey, StoredRun>,
    /// Store-wide counter; a version value is never handed out twice, even
    /// when a deleted run is recreated under the same key.
    last_version: u64,
}

fn next_version(last_version: &mut u64) -> u64 {
    *last_version += 1;
    *last_version
}

/// Outcome of an owner deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was removed.
    Deleted,
    /// The record has finalizers; deletion completes once they are removed.
    Pending,
    /// No such record.
    NotFound,
}

/// In-memory run store.
///
/// ## Example
///
/// ```rust
/// use notifier_controller::accessor::memory::InMemoryRunStore;
/// use notifier_controller::run::Run;
/// use notifier_core::RunKey;
///
/// let store = InMemoryRunStore::new();
/// let version = store.insert(Run::new(RunKey::new("ci", "r1").unwrap())).unwrap();
/// assert_eq!(version, "1");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    state: RwLock<StoreState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("run store lock poisoned")
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a run, as the pipeline subsystem would.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, run: Run) -> Result<String> {
        let mut guard = self.state.write().map_err(poison_err)?;
        let state = &mut *guard;
        let version = next_version(&mut state.last_version);
        state.runs.insert(run.key().clone(), StoredRun { run, version });
        drop(guard);
        Ok(version.to_string())
    }

    /// Applies an unconditional external mutation to a stored run.
    ///
    /// Returns the new version, or `None` if the run does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn update<F>(&self, key: &RunKey, mutate: F) -> Result<Option<String>>
    where
        F: FnOnce(&mut Run),
    {
        let mut guard = self.state.write().map_err(poison_err)?;
        let state = &mut *guard;
        let Some(stored) = state.runs.get_mut(key) else {
            drop(guard);
            return Ok(None);
        };
        mutate(&mut stored.run);
        stored.version = next_version(&mut state.last_version);
        let version = stored.version;
        drop(guard);
        Ok(Some(version.to_string()))
    }

    /// Returns the current snapshot of a run without going through the trait.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn get(&self, key: &RunKey) -> Result<Option<Snapshot>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.runs.get(key).map(|stored| Snapshot {
            run: stored.run.clone(),
            version: stored.version.to_string(),
        }))
    }

    /// Asks for a run to be deleted, honouring finalizers.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn request_delete(&self, key: &RunKey) -> Result<DeleteOutcome> {
        let mut guard = self.state.write().map_err(poison_err)?;
        let state = &mut *guard;
        let Some(stored) = state.runs.get_mut(key) else {
            drop(guard);
            return Ok(DeleteOutcome::NotFound);
        };

        if stored.run.metadata.finalizers.is_empty() {
            state.runs.remove(key);
            drop(guard);
            return Ok(DeleteOutcome::Deleted);
        }

        if stored.run.metadata.deletion_requested_at.is_none() {
            stored.run.metadata.deletion_requested_at = Some(Utc::now());
            stored.version = next_version(&mut state.last_version);
        }
        drop(guard);
        Ok(DeleteOutcome::Pending)
    }

    /// Returns the number of runs currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn run_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.runs.len())
    }
}

#[async_trait]
impl RunAccessor for InMemoryRunStore {
    async fn fetch(&self, key: &RunKey) -> Result<Option<Snapshot>> {
        self.get(key)
    }

    async fn patch(
        &self,
        key: &RunKey,
        expected_version: &str,
        patch: &RunPatch,
    ) -> Result<PatchResult> {
        let mut guard = self.state.write().map_err(poison_err)?;
        let state = &mut *guard;

        let Some(stored) = state.runs.get_mut(key) else {
            drop(guard);
            return Ok(PatchResult::NotFound);
        };

        if stored.version.to_string() != expected_version {
            let current_version = stored.version.to_string();
            drop(guard);
            return Ok(PatchResult::Conflict { current_version });
        }

        patch.apply(&mut stored.run);
        stored.version = next_version(&mut state.last_version);
        let version = stored.version.to_string();

        if stored.run.is_deletion_requested() && stored.run.metadata.finalizers.is_empty() {
            state.runs.remove(key);
        }
        drop(guard);

        Ok(PatchResult::Applied { version })
    }
}
