//! Shared test utilities for notifier integration tests.
//!
//! This crate provides:
//! - [`TracingRunStore`]: In-memory run store with operation recording and
//!   fault injection
//! - [`TestContext`]: Store, sink and reconciler wired together
//! - Factory functions for runs in each phase
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use notifier_test_utils::{TestContext, assert_marked, succeeded_run};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let key = ctx.seed(succeeded_run("build-1", ctx.markers()));
//!     // ... reconcile ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("notifier_controller=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
