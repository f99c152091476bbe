//! Pre-built test fixtures for common reconcile scenarios.
//!
//! Provides factory functions to create runs in each phase with sensible
//! defaults, and a [`TestContext`] wiring a store, sink and reconciler.

use std::sync::Arc;

use notifier_controller::accessor::RunAccessor;
use notifier_controller::config::ControllerConfig;
use notifier_controller::engine::{Reconcile, ReconcileOutcome, Reconciler};
use notifier_controller::error::ReconcileError;
use notifier_controller::notify::memory::InMemorySink;
use notifier_controller::run::{Completion, Run, RunResult};
use notifier_controller::state::Markers;
use notifier_core::RunKey;
use tokio_util::sync::CancellationToken;

use crate::storage::TracingRunStore;

/// Namespace used by fixture runs.
pub const TEST_NAMESPACE: &str = "ci";

/// Returns a run key in the test namespace.
pub fn run_key(name: &str) -> RunKey {
    RunKey::new(TEST_NAMESPACE, name).expect("valid run key")
}

/// Results carried by succeeded fixture runs.
pub fn sample_results() -> Vec<RunResult> {
    vec![
        RunResult::new("image-digest", "sha256:4f1c9a"),
        RunResult::new("commit", "9e2d7b1"),
    ]
}

/// A freshly created run: no guard, no marker, still running.
pub fn pending_run(name: &str) -> Run {
    Run::new(run_key(name))
}

/// A running run that already carries the guard.
pub fn guarded_run(name: &str, markers: &Markers) -> Run {
    pending_run(name).with_finalizer(markers.guard_token.clone())
}

/// A guarded run that succeeded with [`sample_results`].
pub fn succeeded_run(name: &str, markers: &Markers) -> Run {
    guarded_run(name, markers).with_results(&sample_results())
}

/// A guarded run that failed.
pub fn failed_run(name: &str, markers: &Markers) -> Run {
    guarded_run(name, markers).with_completion(Completion::Failed)
}

/// A succeeded run whose notification was already recorded.
pub fn notified_run(name: &str, markers: &Markers) -> Run {
    succeeded_run(name, markers)
        .with_annotation(markers.marker_key.clone(), markers.marker_value.clone())
}

/// A run notified before guards existed: marker present, guard absent.
pub fn legacy_run(name: &str, markers: &Markers) -> Run {
    pending_run(name)
        .with_results(&sample_results())
        .with_annotation(markers.marker_key.clone(), markers.marker_value.clone())
}

/// A guarded run that succeeded with an undecodable result encoding.
pub fn malformed_run(name: &str, markers: &Markers) -> Run {
    guarded_run(name, markers)
        .with_completion(Completion::Succeeded)
        .with_raw_results(serde_json::json!({"not": "a list"}))
}

/// Test context with a tracing store, an in-memory sink and a reconciler.
pub struct TestContext {
    /// Shared run store.
    pub store: Arc<TracingRunStore>,
    /// Shared notification sink.
    pub sink: Arc<InMemorySink>,
    /// Configuration the reconciler was built from.
    pub config: ControllerConfig,
    /// Reconciler under test.
    pub reconciler: Reconciler,
}

impl TestContext {
    /// Creates a context with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    /// Creates a context with the given configuration.
    #[must_use]
    pub fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(TracingRunStore::new());
        let sink = Arc::new(InMemorySink::default());
        let accessor: Arc<dyn RunAccessor> = store.clone();
        let reconciler = Reconciler::new(accessor, sink.clone(), &config);
        Self {
            store,
            sink,
            config,
            reconciler,
        }
    }

    /// Returns the configured markers.
    pub fn markers(&self) -> &Markers {
        &self.config.markers
    }

    /// Stores a run and returns its key.
    pub fn seed(&self, run: Run) -> RunKey {
        let key = run.key().clone();
        self.store.inner().insert(run).expect("insert run");
        key
    }

    /// Returns the stored run, if it still exists.
    pub fn current(&self, key: &RunKey) -> Option<Run> {
        self.store
            .inner()
            .get(key)
            .expect("read run")
            .map(|snapshot| snapshot.run)
    }

    /// Runs one reconcile invocation with a live cancellation token.
    pub async fn reconcile(&self, key: &RunKey) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconciler
            .reconcile(key, &CancellationToken::new())
            .await
    }

    /// Reconciles until an invocation makes no change, returning every outcome.
    ///
    /// Panics after `max_rounds` mutating invocations.
    pub async fn reconcile_until_quiet(
        &self,
        key: &RunKey,
        max_rounds: usize,
    ) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..max_rounds {
            let outcome = self.reconcile(key).await.expect("reconcile");
            outcomes.push(outcome);
            if !outcome.action.mutated() {
                return outcomes;
            }
        }
        panic!("run {key} still changing after {max_rounds} reconciles: {outcomes:?}");
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
