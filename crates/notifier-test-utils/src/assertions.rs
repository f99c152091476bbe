//! Custom assertion helpers for integration tests.

use notifier_controller::run::Run;
use notifier_controller::state::{Markers, has_guard, has_marker};

use crate::fixtures::TestContext;
use notifier_core::RunKey;

/// Asserts that a run carries the guard.
///
/// # Panics
///
/// Panics if the guard is absent.
pub fn assert_guarded(run: &Run, markers: &Markers) {
    assert!(
        has_guard(run, markers),
        "Expected run {} to carry guard {:?}, finalizers were {:?}",
        run.key(),
        markers.guard_token,
        run.metadata.finalizers
    );
}

/// Asserts that a run does not carry the guard.
///
/// # Panics
///
/// Panics if the guard is present.
pub fn assert_unguarded(run: &Run, markers: &Markers) {
    assert!(
        !has_guard(run, markers),
        "Expected run {} to be released, finalizers were {:?}",
        run.key(),
        run.metadata.finalizers
    );
}

/// Asserts that a run carries the notification marker.
///
/// # Panics
///
/// Panics if the marker is absent or has a different value.
pub fn assert_marked(run: &Run, markers: &Markers) {
    assert!(
        has_marker(run, markers),
        "Expected run {} to carry marker {}={}, annotations were {:?}",
        run.key(),
        markers.marker_key,
        markers.marker_value,
        run.metadata.annotations
    );
}

/// Asserts that a run does not carry the notification marker.
///
/// # Panics
///
/// Panics if the marker is present.
pub fn assert_unmarked(run: &Run, markers: &Markers) {
    assert!(
        !has_marker(run, markers),
        "Expected run {} to have no marker, annotations were {:?}",
        run.key(),
        run.metadata.annotations
    );
}

/// Asserts that the sink received exactly `expected` deliveries for `key`.
///
/// # Panics
///
/// Panics if the delivery count differs.
pub fn assert_delivery_count(ctx: &TestContext, key: &RunKey, expected: usize) {
    let delivered = ctx.sink.delivered().expect("read sink");
    let count = delivered.iter().filter(|p| &p.run == key).count();
    assert_eq!(
        count, expected,
        "Expected {expected} deliveries for {key}, got {count}"
    );
}

/// Asserts that a run no longer exists in the store.
///
/// # Panics
///
/// Panics if the run is still stored.
pub fn assert_removed(ctx: &TestContext, key: &RunKey) {
    assert!(
        ctx.current(key).is_none(),
        "Expected run {key} to be removed"
    );
}
