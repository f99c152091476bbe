//! Reconciliation engine.
//!
//! The external scheduler calls [`Reconcile::reconcile`] once per observed
//! change of a run record. Invocations are at-least-once and may run in
//! parallel for distinct runs, never for the same run.
//!
//! Each invocation reads the current snapshot, classifies it
//! ([`RunPhase::classify`]) and applies at most one idempotent mutation:
//!
//! | Phase                | Mutation                                   | Action              |
//! |----------------------|--------------------------------------------|---------------------|
//! | `Legacy`             | none                                       | `Legacy`            |
//! | `Unguarded`          | add Guard Token                            | `GuardAdded`        |
//! | `AwaitingCompletion` | none                                       | `AwaitingCompletion`|
//! | `ReadyToNotify`      | extract, dispatch, then set Marker         | `Notified`          |
//! | `ReadyToRelease`     | remove Guard Token                         | `Released`          |
//! | `Anomalous`          | remove Guard Token, report anomaly         | `ReleasedAnomalous` |
//!
//! The decision depends only on what was written, never on what an earlier
//! invocation decided, so replays, reordering and crash-restarts are safe.
//! Every write is conditional on the version it was computed from; on a
//! conflict the engine re-fetches and decides again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use notifier_core::{RunKey, reconcile_span};

use crate::accessor::{PatchResult, RunAccessor, RunPatch};
use crate::config::ControllerConfig;
use crate::error::{ReconcileError, Result};
use crate::extract::extract_results;
use crate::metrics::{ControllerMetrics, TimingGuard};
use crate::notify::webhook::WebhookSink;
use crate::notify::{NotificationDispatcher, NotificationSink, NotifyError};
use crate::run::RunResult;
use crate::state::{Markers, RunPhase};

/// Controller name used in spans.
pub const CONTROLLER_NAME: &str = "run-notifier";

/// What a reconcile invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// The run no longer exists; nothing to do.
    NotFound,
    /// Marker present without our guard; left untouched.
    Legacy,
    /// Guarded run that has not succeeded yet; nothing to do.
    AwaitingCompletion,
    /// The Guard Token was added.
    GuardAdded,
    /// Results were dispatched and the Marker was set.
    Notified,
    /// The Guard Token was removed after notification.
    Released,
    /// The Guard Token was removed from a marked run that has not succeeded.
    ReleasedAnomalous,
}

impl Action {
    /// Returns true if the action wrote to the run record.
    #[must_use]
    pub const fn mutated(self) -> bool {
        matches!(
            self,
            Self::GuardAdded | Self::Notified | Self::Released | Self::ReleasedAnomalous
        )
    }

    /// Returns the action as a `snake_case` label (for logs and metrics).
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Legacy => "legacy",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::GuardAdded => "guard_added",
            Self::Notified => "notified",
            Self::Released => "released",
            Self::ReleasedAnomalous => "released_anomalous",
        }
    }
}

/// When the scheduler should invoke reconcile again for the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next observed change.
    Never,
    /// As soon as possible.
    Now,
    /// After the given delay.
    After(Duration),
}

/// Result of a successful reconcile invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// What the invocation did.
    pub action: Action,
    /// Requeue request for the scheduler.
    pub requeue: Requeue,
}

impl ReconcileOutcome {
    const fn done(action: Action) -> Self {
        Self {
            action,
            requeue: Requeue::Never,
        }
    }
}

/// Dispatch interface the external scheduler drives.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Reconciles one run.
    ///
    /// `cancel` carries the scheduler's deadline for this invocation.
    async fn reconcile(
        &self,
        key: &RunKey,
        cancel: &CancellationToken,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError>;

    /// Maps a failed invocation to a requeue request.
    fn error_policy(&self, error: &ReconcileError) -> Requeue;
}

/// The notification reconciler.
pub struct Reconciler {
    accessor: Arc<dyn RunAccessor>,
    dispatcher: NotificationDispatcher,
    markers: Markers,
    max_conflict_retries: u32,
    retry_backoff: Duration,
    rejected_backoff: Duration,
    metrics: ControllerMetrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("dispatcher", &self.dispatcher)
            .field("markers", &self.markers)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over the given accessor and sink.
    #[must_use]
    pub fn new(
        accessor: Arc<dyn RunAccessor>,
        sink: Arc<dyn NotificationSink>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            accessor,
            dispatcher: NotificationDispatcher::new(sink),
            markers: config.markers.clone(),
            max_conflict_retries: config.max_conflict_retries,
            retry_backoff: config.retry_backoff,
            rejected_backoff: config.rejected_backoff,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Creates a reconciler that delivers through the configured webhook.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no webhook is configured or its
    /// settings are invalid.
    pub fn from_config(config: &ControllerConfig, accessor: Arc<dyn RunAccessor>) -> Result<Self> {
        let sink = WebhookSink::new(config.require_webhook()?.clone())?;
        Ok(Self::new(accessor, Arc::new(sink), config))
    }

    /// Returns the markers this reconciler recognises.
    #[must_use]
    pub const fn markers(&self) -> &Markers {
        &self.markers
    }

    async fn reconcile_once(
        &self,
        key: &RunKey,
        cancel: &CancellationToken,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        let mut delivered: Option<Vec<RunResult>> = None;
        let mut conflicts: u32 = 0;

        loop {
            // A delivered payload still gets its marker written after cancellation.
            if delivered.is_none() {
                ensure_active(cancel)?;
            }
            let Some(snapshot) = self.accessor.fetch(key).await? else {
                tracing::debug!("run not found; nothing to reconcile");
                return Ok(ReconcileOutcome::done(Action::NotFound));
            };

            let phase = RunPhase::classify(&snapshot.run, &self.markers);
            tracing::debug!(
                %phase,
                completion = %snapshot.run.completion(),
                version = %snapshot.version,
                "classified run"
            );

            let (patch, action) = match phase {
                RunPhase::Legacy => {
                    tracing::debug!("marker present without guard; leaving run untouched");
                    return Ok(ReconcileOutcome::done(Action::Legacy));
                }
                RunPhase::AwaitingCompletion => {
                    return Ok(ReconcileOutcome::done(Action::AwaitingCompletion));
                }
                RunPhase::Unguarded => {
                    ensure_active(cancel)?;
                    (self.guard_patch(true), Action::GuardAdded)
                }
                RunPhase::ReadyToNotify => {
                    let results = extract_results(&snapshot.run)?;

                    if delivered.as_ref() == Some(&results) {
                        tracing::debug!("results already delivered; retrying marker write");
                    } else {
                        self.dispatch(key, &results, cancel).await?;
                        delivered = Some(results);
                    }
                    (self.marker_patch(), Action::Notified)
                }
                RunPhase::ReadyToRelease => {
                    ensure_active(cancel)?;
                    (self.guard_patch(false), Action::Released)
                }
                RunPhase::Anomalous => {
                    ensure_active(cancel)?;
                    self.metrics.record_anomaly();
                    tracing::error!(
                        completion = %snapshot.run.completion(),
                        "notification marker present on a run that has not succeeded; releasing guard"
                    );
                    (self.guard_patch(false), Action::ReleasedAnomalous)
                }
            };

            match self.accessor.patch(key, &snapshot.version, &patch).await? {
                PatchResult::Applied { version } => {
                    tracing::info!(
                        action = action.as_label(),
                        patch = patch.as_label(),
                        %version,
                        "reconciled run"
                    );
                    let requeue = if action == Action::Notified {
                        Requeue::Now
                    } else {
                        Requeue::Never
                    };
                    return Ok(ReconcileOutcome { action, requeue });
                }
                PatchResult::NotFound => {
                    tracing::debug!("run deleted before write; nothing to reconcile");
                    return Ok(ReconcileOutcome::done(Action::NotFound));
                }
                PatchResult::Conflict { current_version } => {
                    conflicts += 1;
                    self.metrics.record_conflict();
                    if conflicts > self.max_conflict_retries {
                        return Err(ReconcileError::ConflictRetriesExhausted {
                            attempts: conflicts,
                        });
                    }
                    tracing::debug!(
                        expected = %snapshot.version,
                        %current_version,
                        conflicts,
                        "run changed since read; re-fetching"
                    );
                }
            }
        }
    }

    async fn dispatch(
        &self,
        key: &RunKey,
        results: &[RunResult],
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ReconcileError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ReconcileError::Cancelled),
            result = self.dispatcher.dispatch(key, results) => result.map_err(ReconcileError::from),
        }
    }

    fn guard_patch(&self, add: bool) -> RunPatch {
        let token = self.markers.guard_token.clone();
        if add {
            RunPatch::AddFinalizer(token)
        } else {
            RunPatch::RemoveFinalizer(token)
        }
    }

    fn marker_patch(&self) -> RunPatch {
        RunPatch::SetAnnotation {
            key: self.markers.marker_key.clone(),
            value: self.markers.marker_value.clone(),
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> std::result::Result<(), ReconcileError> {
    if cancel.is_cancelled() {
        Err(ReconcileError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(
        &self,
        key: &RunKey,
        cancel: &CancellationToken,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        let metrics = self.metrics.clone();
        let _timer = TimingGuard::new(move |duration| metrics.observe_reconcile_duration(duration));
        let span = reconcile_span(CONTROLLER_NAME, key);

        let result = self.reconcile_once(key, cancel).instrument(span.clone()).await;

        match &result {
            Ok(outcome) => self.metrics.record_reconcile(outcome.action.as_label()),
            Err(err) => {
                self.metrics.record_reconcile_error(err.as_label());
                span.in_scope(|| match err {
                    // The dispatcher has already logged sink failures.
                    ReconcileError::Notify(_) => {}
                    ReconcileError::Cancelled => tracing::debug!("reconcile cancelled"),
                    _ if err.needs_correction() => tracing::warn!(
                        error = %err,
                        "reconcile failed; run record needs correction before a retry can succeed"
                    ),
                    _ => tracing::warn!(error = %err, "reconcile failed; will retry"),
                });
            }
        }

        result
    }

    fn error_policy(&self, error: &ReconcileError) -> Requeue {
        match error {
            ReconcileError::Notify(NotifyError::Rejected { .. }) => {
                Requeue::After(self.rejected_backoff)
            }
            _ => Requeue::After(self.retry_backoff),
        }
    }
}
