//! End-to-end reconcile scenarios against the tracing in-memory store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use notifier_controller::accessor::RunPatch;
use notifier_controller::accessor::memory::DeleteOutcome;
use notifier_controller::config::ControllerConfig;
use notifier_controller::engine::{Action, Reconcile, Requeue};
use notifier_controller::error::ReconcileError;
use notifier_controller::extract::ExtractionError;
use notifier_controller::notify::NotifyError;
use notifier_controller::run::{Completion, Run, RunResult};
use notifier_test_utils::{
    TestContext, assert_delivery_count, assert_guarded, assert_marked, assert_removed,
    assert_unguarded, assert_unmarked, failed_run, guarded_run, init_test_logging, legacy_run,
    malformed_run, notified_run, pending_run, run_key, sample_results, succeeded_run,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn new_run_gets_guard_without_dispatch() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::GuardAdded);
    assert_eq!(outcome.requeue, Requeue::Never);
    let run = ctx.current(&key).unwrap();
    assert_guarded(&run, ctx.markers());
    assert_unmarked(&run, ctx.markers());
    assert_delivery_count(&ctx, &key, 0);
}

#[tokio::test]
async fn succeeded_run_is_notified_and_keeps_guard() {
    init_test_logging();
    let ctx = TestContext::new();
    let results = vec![RunResult::new("output", "42")];
    let key = ctx.seed(guarded_run("r1", ctx.markers()).with_results(&results));

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Notified);
    assert_eq!(outcome.requeue, Requeue::Now);
    let delivered = ctx.sink.delivered().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].run, key);
    assert_eq!(delivered[0].results, results);

    let run = ctx.current(&key).unwrap();
    assert_marked(&run, ctx.markers());
    assert_guarded(&run, ctx.markers());
}

#[tokio::test]
async fn notified_run_is_released_and_deletable() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(notified_run("r1", ctx.markers()));

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Released);
    let run = ctx.current(&key).unwrap();
    assert_unguarded(&run, ctx.markers());
    assert_marked(&run, ctx.markers());
    assert_delivery_count(&ctx, &key, 0);

    let deleted = ctx.store.inner().request_delete(&key).unwrap();
    assert_eq!(deleted, DeleteOutcome::Deleted);
    assert_removed(&ctx, &key);
}

#[tokio::test]
async fn legacy_run_is_left_untouched() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(legacy_run("r2", ctx.markers()));
    let before = ctx.current(&key).unwrap();

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Legacy);
    assert!(ctx.store.patches().is_empty());
    assert_eq!(ctx.current(&key).unwrap(), before);
    assert_delivery_count(&ctx, &key, 0);
}

#[tokio::test]
async fn malformed_results_fail_without_mutation() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(malformed_run("r1", ctx.markers()));

    let err = ctx.reconcile(&key).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Extraction(ExtractionError::MalformedResults { .. })
    ));
    assert_eq!(
        ctx.reconciler.error_policy(&err),
        Requeue::After(ctx.config.retry_backoff)
    );
    assert!(ctx.store.patches().is_empty());
    let run = ctx.current(&key).unwrap();
    assert_guarded(&run, ctx.markers());
    assert_unmarked(&run, ctx.markers());
    assert_eq!(ctx.sink.attempts().unwrap(), 0);
}

#[tokio::test]
async fn missing_run_is_benign() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = run_key("gone");

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::NotFound);
    assert_eq!(outcome.requeue, Requeue::Never);
    assert!(ctx.store.patches().is_empty());
}

#[tokio::test]
async fn pending_guarded_run_waits() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(guarded_run("r1", ctx.markers()));

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::AwaitingCompletion);
    assert!(ctx.store.patches().is_empty());
}

#[tokio::test]
async fn failed_run_keeps_guard() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(failed_run("r1", ctx.markers()));

    for _ in 0..3 {
        let outcome = ctx.reconcile(&key).await.unwrap();
        assert_eq!(outcome.action, Action::AwaitingCompletion);
    }

    assert_guarded(&ctx.current(&key).unwrap(), ctx.markers());
    assert_eq!(
        ctx.store.inner().request_delete(&key).unwrap(),
        DeleteOutcome::Pending
    );
    assert!(ctx.current(&key).is_some());
}

#[tokio::test]
async fn full_lifecycle_delivers_once() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));

    let outcomes = ctx.reconcile_until_quiet(&key, 5).await;
    let actions: Vec<_> = outcomes.iter().map(|o| o.action).collect();
    assert_eq!(actions, vec![Action::GuardAdded, Action::AwaitingCompletion]);

    ctx.store
        .inner()
        .update(&key, |run| *run = run.clone().with_results(&sample_results()))
        .unwrap();

    let outcomes = ctx.reconcile_until_quiet(&key, 5).await;
    let actions: Vec<_> = outcomes.iter().map(|o| o.action).collect();
    assert_eq!(
        actions,
        vec![Action::Notified, Action::Released, Action::Legacy]
    );
    assert_delivery_count(&ctx, &key, 1);

    // Replays after release stay quiet.
    ctx.reconcile(&key).await.unwrap();
    assert_delivery_count(&ctx, &key, 1);
}

#[tokio::test]
async fn owner_deletion_waits_for_notification() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));
    ctx.reconcile(&key).await.unwrap();

    assert_eq!(
        ctx.store.inner().request_delete(&key).unwrap(),
        DeleteOutcome::Pending
    );
    ctx.store
        .inner()
        .update(&key, |run| *run = run.clone().with_results(&sample_results()))
        .unwrap();

    ctx.reconcile_until_quiet(&key, 5).await;

    assert_delivery_count(&ctx, &key, 1);
    assert_removed(&ctx, &key);
}

#[tokio::test]
async fn guard_conflict_refetches_and_redecides() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));
    ctx.store.interfere_before_next_patch(|run| {
        run.metadata
            .annotations
            .insert("pipeline/step".into(), "build".into());
    });

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::GuardAdded);
    assert_eq!(ctx.store.fetch_count(), 2);
    let run = ctx.current(&key).unwrap();
    assert_guarded(&run, ctx.markers());
    assert_eq!(run.annotation("pipeline/step"), Some("build"));
}

#[tokio::test]
async fn conflict_that_changes_phase_is_honoured() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    let markers = ctx.markers().clone();
    // A replica finished the notification between our read and our write.
    ctx.store.interfere_before_next_patch(move |run| {
        run.metadata
            .annotations
            .insert(markers.marker_key.clone(), markers.marker_value.clone());
    });

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Released);
    assert_eq!(
        ctx.store.patches().last(),
        Some(&RunPatch::RemoveFinalizer(ctx.markers().guard_token.clone()))
    );
}

#[tokio::test]
async fn marker_conflict_does_not_redispatch() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    ctx.store.interfere_before_next_patch(|run| {
        run.metadata
            .annotations
            .insert("pipeline/observed".into(), "1".into());
    });

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Notified);
    assert_eq!(ctx.sink.attempts().unwrap(), 1);
    assert_marked(&ctx.current(&key).unwrap(), ctx.markers());
}

#[tokio::test]
async fn conflict_budget_is_bounded() {
    init_test_logging();
    let config = ControllerConfig {
        max_conflict_retries: 1,
        ..ControllerConfig::default()
    };
    let ctx = TestContext::with_config(config);
    let key = ctx.seed(pending_run("r1"));
    for i in 0..2 {
        ctx.store.interfere_before_next_patch(move |run| {
            run.metadata
                .annotations
                .insert("pipeline/round".into(), i.to_string());
        });
    }

    let err = ctx.reconcile(&key).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::ConflictRetriesExhausted { attempts: 2 }
    ));
    assert_eq!(err.as_label(), "conflict");
    assert!(!ctx.current(&key).unwrap().has_finalizer(&ctx.markers().guard_token));
}

#[tokio::test]
async fn crash_before_marker_write_redispatches() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    ctx.store.fail_next_patch("set_annotation");

    let err = ctx.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store(_)));
    assert_unmarked(&ctx.current(&key).unwrap(), ctx.markers());

    let outcome = ctx.reconcile(&key).await.unwrap();
    assert_eq!(outcome.action, Action::Notified);

    let delivered = ctx.sink.delivered().unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].fingerprint, delivered[1].fingerprint);
    assert_marked(&ctx.current(&key).unwrap(), ctx.markers());
}

#[tokio::test]
async fn transport_failure_leaves_run_unchanged() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    ctx.sink
        .fail_next(NotifyError::transport("connection refused"))
        .unwrap();

    let err = ctx.reconcile(&key).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Notify(NotifyError::Transport { .. })));
    assert_eq!(
        ctx.reconciler.error_policy(&err),
        Requeue::After(ctx.config.retry_backoff)
    );
    assert!(ctx.store.patches().is_empty());
    assert_unmarked(&ctx.current(&key).unwrap(), ctx.markers());

    let outcome = ctx.reconcile(&key).await.unwrap();
    assert_eq!(outcome.action, Action::Notified);
    assert_delivery_count(&ctx, &key, 1);
}

#[tokio::test]
async fn rejection_uses_longer_backoff() {
    init_test_logging();
    let config = ControllerConfig {
        rejected_backoff: Duration::from_secs(600),
        ..ControllerConfig::default()
    };
    let ctx = TestContext::with_config(config);
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    ctx.sink
        .fail_next(NotifyError::rejected(Some(422), "unknown result name"))
        .unwrap();

    let err = ctx.reconcile(&key).await.unwrap_err();

    assert!(err.needs_correction());
    assert_eq!(
        ctx.reconciler.error_policy(&err),
        Requeue::After(Duration::from_secs(600))
    );
    assert_unmarked(&ctx.current(&key).unwrap(), ctx.markers());
}

#[tokio::test]
async fn anomalous_run_releases_guard() {
    init_test_logging();
    let ctx = TestContext::new();
    let markers = ctx.markers().clone();
    let key = ctx.seed(
        guarded_run("r1", &markers)
            .with_completion(Completion::Failed)
            .with_annotation(markers.marker_key.clone(), markers.marker_value.clone()),
    );

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::ReleasedAnomalous);
    let run = ctx.current(&key).unwrap();
    assert_unguarded(&run, &markers);
    assert_eq!(run.completion(), Completion::Failed);
    assert_delivery_count(&ctx, &key, 0);
}

#[tokio::test]
async fn foreign_marker_value_is_not_a_marker() {
    init_test_logging();
    let ctx = TestContext::new();
    let markers = ctx.markers().clone();
    let key = ctx.seed(
        succeeded_run("r1", &markers).with_annotation(markers.marker_key.clone(), "false"),
    );

    let outcome = ctx.reconcile(&key).await.unwrap();

    assert_eq!(outcome.action, Action::Notified);
    assert_marked(&ctx.current(&key).unwrap(), &markers);
}

#[tokio::test]
async fn cancelled_invocation_does_nothing() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ctx.reconciler.reconcile(&key, &cancel).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert!(ctx.store.operations().is_empty());
    assert!(!ctx.current(&key).unwrap().has_finalizer(&ctx.markers().guard_token));
}

#[tokio::test]
async fn marker_write_survives_cancellation_after_delivery() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(succeeded_run("r1", ctx.markers()));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    // The deadline fires while the first marker write is in flight and loses
    // to a concurrent edit.
    ctx.store.interfere_before_next_patch(move |run| {
        trigger.cancel();
        run.metadata
            .annotations
            .insert("pipeline/observed".into(), "1".into());
    });

    let outcome = ctx.reconciler.reconcile(&key, &cancel).await.unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(outcome.action, Action::Notified);
    assert_eq!(ctx.sink.attempts().unwrap(), 1);
    assert_eq!(ctx.store.patches().len(), 2);
    assert_marked(&ctx.current(&key).unwrap(), ctx.markers());
}

#[tokio::test]
async fn custom_markers_are_respected() {
    init_test_logging();
    let mut config = ControllerConfig::default();
    config.markers.guard_token = "example.com/notify".into();
    config.markers.marker_key = "example.com/notified".into();
    config.markers.marker_value = "yes".into();
    let ctx = TestContext::with_config(config);
    let key = ctx.seed(Run::new(run_key("r1")));

    ctx.reconcile(&key).await.unwrap();
    let run = ctx.current(&key).unwrap();
    assert!(run.has_finalizer("example.com/notify"));

    ctx.store
        .inner()
        .update(&key, |run| *run = run.clone().with_results(&sample_results()))
        .unwrap();
    ctx.reconcile_until_quiet(&key, 5).await;

    let run = ctx.current(&key).unwrap();
    assert_eq!(run.annotation("example.com/notified"), Some("yes"));
    assert!(!run.has_finalizer("example.com/notify"));
}

#[tokio::test]
async fn fetch_failure_is_retryable() {
    init_test_logging();
    let ctx = TestContext::new();
    let key = ctx.seed(pending_run("r1"));
    ctx.store.fail_next_fetch();

    let err = ctx.reconcile(&key).await.unwrap_err();
    assert_eq!(err.as_label(), "store");
    assert_eq!(
        ctx.reconciler.error_policy(&err),
        Requeue::After(ctx.config.retry_backoff)
    );

    let outcome = ctx.reconcile(&key).await.unwrap();
    assert_eq!(outcome.action, Action::GuardAdded);
}

struct StalledSink;

#[async_trait::async_trait]
impl notifier_controller::notify::NotificationSink for StalledSink {
    async fn deliver(
        &self,
        _payload: &notifier_controller::notify::NotificationPayload,
    ) -> Result<(), NotifyError> {
        std::future::pending().await
    }

    fn sink_name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn cancellation_interrupts_stalled_dispatch() {
    use std::sync::Arc;

    use notifier_controller::engine::Reconciler;
    use notifier_test_utils::TracingRunStore;

    init_test_logging();
    let config = ControllerConfig::default();
    let store = Arc::new(TracingRunStore::new());
    let key = run_key("r1");
    store
        .inner()
        .insert(succeeded_run("r1", &config.markers))
        .unwrap();
    let reconciler = Reconciler::new(store.clone(), Arc::new(StalledSink), &config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = reconciler.reconcile(&key, &cancel).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert!(store.patches().is_empty());
    let run = store.inner().get(&key).unwrap().unwrap().run;
    assert!(run.annotation(&config.markers.marker_key).is_none());
}
