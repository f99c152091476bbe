//! Test run store with operation tracing and fault injection.
//!
//! Wraps [`InMemoryRunStore`] and records every accessor call so tests can
//! assert on exactly which reads and writes a reconcile performed.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use notifier_controller::accessor::memory::InMemoryRunStore;
use notifier_controller::accessor::{PatchResult, RunAccessor, RunPatch, Snapshot};
use notifier_controller::error::{Error, Result};
use notifier_controller::run::Run;
use notifier_core::RunKey;

/// Record of an accessor operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Fetch operation.
    Fetch {
        /// Run that was read.
        key: RunKey,
    },
    /// Conditional patch operation.
    Patch {
        /// Run that was written.
        key: RunKey,
        /// Version the write was conditioned on.
        expected_version: String,
        /// Mutation requested.
        patch: RunPatch,
    },
}

type Interference = Box<dyn FnOnce(&mut Run) + Send>;

/// In-memory run store with operation tracing.
#[derive(Default)]
pub struct TracingRunStore {
    inner: InMemoryRunStore,
    operations: Mutex<Vec<StoreOp>>,
    interference: Mutex<VecDeque<Interference>>,
    failing_patches: Mutex<Vec<&'static str>>,
    failing_fetches: Mutex<usize>,
}

impl std::fmt::Debug for TracingRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingRunStore")
            .field("inner", &self.inner)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl TracingRunStore {
    /// Creates a new empty tracing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapped store (for seeding and external mutations).
    pub fn inner(&self) -> &InMemoryRunStore {
        &self.inner
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the patches that were requested, in order.
    #[must_use]
    pub fn patches(&self) -> Vec<RunPatch> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Patch { patch, .. } => Some(patch),
                StoreOp::Fetch { .. } => None,
            })
            .collect()
    }

    /// Returns the number of fetches performed.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, StoreOp::Fetch { .. }))
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Mutates the stored run right before the next patch is evaluated.
    ///
    /// The mutation bumps the version, so that patch hits a conflict.
    pub fn interfere_before_next_patch<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Run) + Send + 'static,
    {
        self.interference
            .lock()
            .expect("lock")
            .push_back(Box::new(mutate));
    }

    /// Fails the next patch of the given kind (see [`RunPatch::as_label`]).
    pub fn fail_next_patch(&self, label: &'static str) {
        self.failing_patches.lock().expect("lock").push(label);
    }

    /// Fails the next fetch.
    pub fn fail_next_fetch(&self) {
        *self.failing_fetches.lock().expect("lock") += 1;
    }

    fn record(&self, op: StoreOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn take_patch_failure(&self, patch: &RunPatch) -> bool {
        let mut failing = self.failing_patches.lock().expect("lock");
        match failing.iter().position(|label| *label == patch.as_label()) {
            Some(index) => {
                failing.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RunAccessor for TracingRunStore {
    async fn fetch(&self, key: &RunKey) -> Result<Option<Snapshot>> {
        self.record(StoreOp::Fetch { key: key.clone() });
        {
            let mut failing = self.failing_fetches.lock().expect("lock");
            if *failing > 0 {
                *failing -= 1;
                return Err(Error::storage(format!("injected fetch failure for {key}")));
            }
        }
        self.inner.fetch(key).await
    }

    async fn patch(
        &self,
        key: &RunKey,
        expected_version: &str,
        patch: &RunPatch,
    ) -> Result<PatchResult> {
        self.record(StoreOp::Patch {
            key: key.clone(),
            expected_version: expected_version.to_string(),
            patch: patch.clone(),
        });

        if self.take_patch_failure(patch) {
            return Err(Error::storage(format!(
                "injected {} failure for {key}",
                patch.as_label()
            )));
        }

        let interference = self.interference.lock().expect("lock").pop_front();
        if let Some(mutate) = interference {
            self.inner.update(key, mutate)?;
        }

        self.inner.patch(key, expected_version, patch).await
    }
}
