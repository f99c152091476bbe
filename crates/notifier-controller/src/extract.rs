//! Result extraction.
//!
//! Pulls the ordered `(name, value)` result sequence out of a succeeded run's
//! raw result encoding. Extraction is pure: no I/O, no side effects.

use serde::Deserialize;

use crate::run::{Completion, Run, RunResult};

/// Errors raised while extracting results from a run.
///
/// These are recoverable only by external correction of the record, so the
/// reconciler reports them as retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// The run has not succeeded, so it has no results yet.
    #[error("run has not succeeded (completion: {completion})")]
    NotSucceeded {
        /// The completion state that was observed.
        completion: Completion,
    },

    /// The succeeded run carries no result encoding.
    #[error("succeeded run has no results field")]
    MissingResults,

    /// The result encoding could not be decoded into `(name, value)` pairs.
    #[error("malformed results: {reason}")]
    MalformedResults {
        /// Why decoding failed.
        reason: String,
    },
}

/// Extracts the ordered result sequence from a succeeded run.
///
/// An empty list is a valid result set.
///
/// # Errors
///
/// - [`ExtractionError::NotSucceeded`] if `completion != Succeeded`
/// - [`ExtractionError::MissingResults`] if `status.results` is absent or `null`
/// - [`ExtractionError::MalformedResults`] if the encoding is not a list of
///   `{ "name": string, "value": string }` objects or a name is empty
pub fn extract_results(run: &Run) -> Result<Vec<RunResult>, ExtractionError> {
    let completion = run.completion();
    if completion != Completion::Succeeded {
        return Err(ExtractionError::NotSucceeded { completion });
    }

    let raw = match run.status.results.as_ref() {
        None | Some(serde_json::Value::Null) => return Err(ExtractionError::MissingResults),
        Some(raw) => raw,
    };

    let results = Vec::<RunResult>::deserialize(raw).map_err(|e| {
        ExtractionError::MalformedResults {
            reason: e.to_string(),
        }
    })?;

    if let Some(index) = results.iter().position(|r| r.name.is_empty()) {
        return Err(ExtractionError::MalformedResults {
            reason: format!("result at index {index} has an empty name"),
        });
    }

    Ok(results)
}
