//! # notifier-controller
//!
//! Reconciler that delivers a pipeline run's results to a notification sink
//! exactly when the run has succeeded, and keeps the run record from being
//! removed until that has happened.
//!
//! The controller is stateless. Progress is recorded on the run record itself
//! through two markers:
//!
//! - **Guard Token**: a finalizer entry that blocks removal of the run
//! - **Notification Marker**: an annotation that records a completed delivery
//!
//! ## Modules
//!
//! - [`run`]: the run record as the controller sees it
//! - [`state`]: marker predicates and phase classification
//! - [`extract`]: typed results from a succeeded run
//! - [`notify`]: payloads, the sink trait and its webhook/in-memory sinks
//! - [`accessor`]: versioned reads and conditional patches of run records
//! - [`engine`]: the [`Reconciler`] and its state table
//! - [`config`]: environment-driven configuration
//! - [`metrics`]: controller metrics
//!
//! ## Example
//!
//! ```rust
//! use notifier_controller::prelude::*;
//!
//! let markers = Markers::default();
//! let key = RunKey::new("ci", "build-1").unwrap();
//!
//! let fresh = Run::new(key.clone());
//! assert_eq!(RunPhase::classify(&fresh, &markers), RunPhase::Unguarded);
//!
//! let done = Run::new(key)
//!     .with_finalizer(markers.guard_token.clone())
//!     .with_results(&[RunResult::new("digest", "sha256:abc")]);
//! assert_eq!(RunPhase::classify(&done, &markers), RunPhase::ReadyToNotify);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod accessor;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod notify;
pub mod run;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use notifier_core::RunKey;

    pub use crate::accessor::memory::InMemoryRunStore;
    pub use crate::accessor::{PatchResult, RunAccessor, RunPatch, Snapshot};
    pub use crate::config::ControllerConfig;
    pub use crate::engine::{Action, Reconcile, ReconcileOutcome, Reconciler, Requeue};
    pub use crate::error::{Error, ReconcileError, Result};
    pub use crate::extract::{ExtractionError, extract_results};
    pub use crate::notify::memory::InMemorySink;
    pub use crate::notify::{
        NotificationDispatcher, NotificationPayload, NotificationSink, NotifyError,
    };
    pub use crate::run::{Completion, Run, RunResult};
    pub use crate::state::{Markers, RunPhase};
}

pub use engine::{Action, Reconcile, ReconcileOutcome, Reconciler, Requeue};
pub use error::{Error, ReconcileError, Result};
