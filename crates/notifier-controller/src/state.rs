//! State predicates and run classification.
//!
//! The reconciler keeps no state of its own. Every invocation derives the
//! run's phase from the tuple `(has_guard, has_marker, completion)` of the
//! snapshot it just read:
//!
//! | guard | marker | completion    | phase                |
//! |-------|--------|---------------|----------------------|
//! | no    | yes    | any           | `Legacy`             |
//! | no    | no     | any           | `Unguarded`          |
//! | yes   | no     | Succeeded     | `ReadyToNotify`      |
//! | yes   | no     | not Succeeded | `AwaitingCompletion` |
//! | yes   | yes    | Succeeded     | `ReadyToRelease`     |
//! | yes   | yes    | not Succeeded | `Anomalous`          |

use std::fmt;

use crate::run::{Completion, Run};

/// Default Guard Token finalizer.
pub const DEFAULT_GUARD_TOKEN: &str = "notification.guard";
/// Default Notification Marker annotation key.
pub const DEFAULT_MARKER_KEY: &str = "notification.sent";
/// Default Notification Marker annotation value.
pub const DEFAULT_MARKER_VALUE: &str = "true";

/// The literal tokens this controller owns on a run record.
///
/// Both are matched exactly and case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    /// Finalizer that blocks deletion until the run is released.
    pub guard_token: String,
    /// Annotation key recording that the notification was dispatched.
    pub marker_key: String,
    /// Annotation value recording that the notification was dispatched.
    pub marker_value: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            guard_token: DEFAULT_GUARD_TOKEN.to_string(),
            marker_key: DEFAULT_MARKER_KEY.to_string(),
            marker_value: DEFAULT_MARKER_VALUE.to_string(),
        }
    }
}

/// Returns true if the run carries the Guard Token.
#[must_use]
pub fn has_guard(run: &Run, markers: &Markers) -> bool {
    run.has_finalizer(&markers.guard_token)
}

/// Returns true if the run carries the Notification Marker with its exact value.
#[must_use]
pub fn has_marker(run: &Run, markers: &Markers) -> bool {
    run.annotation(&markers.marker_key) == Some(markers.marker_value.as_str())
}

/// Returns true if the run has completed successfully.
#[must_use]
pub fn succeeded(run: &Run) -> bool {
    run.completion() == Completion::Succeeded
}

/// Phase of a run derived from its current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Marker present but never guarded by us; left untouched.
    Legacy,
    /// Not yet guarded; the Guard Token must be added first.
    Unguarded,
    /// Guarded, waiting for the run to succeed.
    AwaitingCompletion,
    /// Guarded and succeeded; results must be extracted and dispatched.
    ReadyToNotify,
    /// Notification recorded; the Guard Token can be released.
    ReadyToRelease,
    /// Marker present on a run that has not succeeded. Not produced by our own
    /// writes; the guard is released and the observation reported.
    Anomalous,
}

impl RunPhase {
    /// Classifies a snapshot.
    #[must_use]
    pub fn classify(run: &Run, markers: &Markers) -> Self {
        match (has_guard(run, markers), has_marker(run, markers), succeeded(run)) {
            (false, true, _) => Self::Legacy,
            (false, false, _) => Self::Unguarded,
            (true, false, true) => Self::ReadyToNotify,
            (true, false, false) => Self::AwaitingCompletion,
            (true, true, true) => Self::ReadyToRelease,
            (true, true, false) => Self::Anomalous,
        }
    }

    /// Returns the phase as a `snake_case` label (for logs and metrics).
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Unguarded => "unguarded",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::ReadyToNotify => "ready_to_notify",
            Self::ReadyToRelease => "ready_to_release",
            Self::Anomalous => "anomalous",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
