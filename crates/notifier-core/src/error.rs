//! Error types and result aliases shared by notifier crates.
//!
//! Errors are structured for programmatic handling and include context for
//! debugging.

/// The result type used throughout the notifier.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shared notifier operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Configuration was missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
