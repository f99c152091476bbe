//! Observability infrastructure for the notifier.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers, the span every reconcile runs in, and a wrapper
//! that keeps secrets out of `Debug` output.

use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;
use crate::id::RunKey;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else if s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else {
            Err(Error::configuration(format!(
                "unknown log format '{s}' (expected 'json' or 'pretty')"
            )))
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `notifier_controller=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(subscriber_fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(subscriber_fmt::layer().pretty()).try_init(),
        };
        // Another subscriber (e.g. a test harness) may already be installed.
        drop(result);
    });
}

/// Creates the span a single reconcile invocation runs in.
///
/// # Example
///
/// ```rust
/// use notifier_core::{RunKey, reconcile_span};
///
/// let key = RunKey::new("ci", "build-1").unwrap();
/// let span = reconcile_span("run-notifier", &key);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn reconcile_span(controller: &str, key: &RunKey) -> Span {
    tracing::info_span!(
        "reconcile",
        controller = controller,
        run = %key,
    )
}

/// Wraps a secret so that `Debug` and `Display` never reveal it.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a secret value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns the wrapped secret.
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
