//! Observability metrics for the notification controller.
//!
//! Metrics are emitted through the `metrics` crate facade; installing an
//! exporter is left to the hosting process.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `notifier_reconcile_total` | Counter | `action` | Reconcile invocations by action taken |
//! | `notifier_reconcile_errors_total` | Counter | `kind` | Failed reconcile invocations |
//! | `notifier_reconcile_seconds` | Histogram | - | Reconcile invocation latency |
//! | `notifier_notifications_total` | Counter | `result` | Sink delivery attempts |
//! | `notifier_patch_conflicts_total` | Counter | - | Conditional writes that hit a newer version |
//! | `notifier_anomalies_total` | Counter | - | Marker observed on a run that has not succeeded |

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: reconcile invocations by action.
    pub const RECONCILE_TOTAL: &str = "notifier_reconcile_total";
    /// Counter: failed reconcile invocations by kind.
    pub const RECONCILE_ERRORS_TOTAL: &str = "notifier_reconcile_errors_total";
    /// Histogram: reconcile duration in seconds.
    pub const RECONCILE_SECONDS: &str = "notifier_reconcile_seconds";
    /// Counter: sink deliveries by result.
    pub const NOTIFICATIONS_TOTAL: &str = "notifier_notifications_total";
    /// Counter: optimistic-concurrency conflicts.
    pub const PATCH_CONFLICTS_TOTAL: &str = "notifier_patch_conflicts_total";
    /// Counter: anomalous-row observations.
    pub const ANOMALIES_TOTAL: &str = "notifier_anomalies_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Action taken by a reconcile.
    pub const ACTION: &str = "action";
    /// Error kind.
    pub const KIND: &str = "kind";
    /// Delivery result (delivered, `transport_error`, rejected).
    pub const RESULT: &str = "result";
}

/// Records controller metrics with consistent labels.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct ControllerMetrics;

impl ControllerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a completed reconcile.
    pub fn record_reconcile(&self, action: &str) {
        counter!(names::RECONCILE_TOTAL, labels::ACTION => action.to_string()).increment(1);
    }

    /// Records a failed reconcile.
    pub fn record_reconcile_error(&self, kind: &str) {
        counter!(names::RECONCILE_ERRORS_TOTAL, labels::KIND => kind.to_string()).increment(1);
    }

    /// Records reconcile latency.
    pub fn observe_reconcile_duration(&self, duration: Duration) {
        histogram!(names::RECONCILE_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a sink delivery attempt.
    pub fn record_notification(&self, result: &str) {
        counter!(names::NOTIFICATIONS_TOTAL, labels::RESULT => result.to_string()).increment(1);
    }

    /// Records a conditional-write conflict.
    pub fn record_conflict(&self) {
        counter!(names::PATCH_CONFLICTS_TOTAL).increment(1);
    }

    /// Records an anomalous-row observation.
    pub fn record_anomaly(&self) {
        counter!(names::ANOMALIES_TOTAL).increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_record_without_recorder() {
        let metrics = ControllerMetrics::new();
        metrics.record_reconcile("guard_added");
        metrics.record_reconcile_error("transport");
        metrics.observe_reconcile_duration(Duration::from_millis(5));
        metrics.record_notification("delivered");
        metrics.record_conflict();
        metrics.record_anomaly();
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }
}
