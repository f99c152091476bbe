//! # notifier-core
//!
//! Shared primitives for the pipeline run notifier.
//!
//! This crate provides the foundational types used by the controller and its
//! test utilities:
//!
//! - **Identifiers**: [`RunKey`], the validated `(namespace, name)` identity of a run
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization, reconcile spans and secret redaction
//!
//! ## Example
//!
//! ```rust
//! use notifier_core::prelude::*;
//!
//! let key = RunKey::new("ci", "build-1234").unwrap();
//! assert_eq!(key.to_string(), "ci/build-1234");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::RunKey;
    pub use crate::observability::{LogFormat, Redacted, init_logging, reconcile_span};
}

pub use error::{Error, Result};
pub use id::RunKey;
pub use observability::{LogFormat, Redacted, init_logging, reconcile_span};
