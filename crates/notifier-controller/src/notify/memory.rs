//! In-memory notification sink for testing.
//!
//! This module provides [`InMemorySink`], a recording implementation of
//! [`NotificationSink`] with scripted failures.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: Payloads are only kept in memory
//! - **No deduplication**: Redeliveries are recorded as separate entries

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{NotificationPayload, NotificationSink, NotifyError};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct SinkState {
    delivered: Vec<NotificationPayload>,
    scripted_failures: VecDeque<NotifyError>,
    attempts: usize,
}

/// Recording sink for tests.
///
/// ## Example
///
/// ```rust
/// use notifier_controller::notify::memory::InMemorySink;
///
/// let sink = InMemorySink::new("test-sink");
/// assert!(sink.delivered().unwrap().is_empty());
/// ```
#[derive(Debug)]
pub struct InMemorySink {
    name: String,
    state: RwLock<SinkState>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new("memory")
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("notification sink lock poisoned")
}

impl InMemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(SinkState::default()),
        }
    }

    /// Makes the next delivery attempt fail with `error`.
    ///
    /// Calls queue up: each attempt consumes one scripted failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn fail_next(&self, error: NotifyError) -> Result<()> {
        self.state
            .write()
            .map_err(poison_err)?
            .scripted_failures
            .push_back(error);
        Ok(())
    }

    /// Returns every accepted payload, in delivery order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn delivered(&self) -> Result<Vec<NotificationPayload>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.delivered.clone())
    }

    /// Returns the number of delivery attempts, including failed ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn attempts(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.attempts)
    }
}

#[async_trait]
impl NotificationSink for InMemorySink {
    async fn deliver(&self, payload: &NotificationPayload) -> std::result::Result<(), NotifyError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| NotifyError::transport("notification sink lock poisoned"))?;

        state.attempts += 1;
        if let Some(error) = state.scripted_failures.pop_front() {
            drop(state);
            return Err(error);
        }

        state.delivered.push(payload.clone());
        drop(state);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        &self.name
    }
}
