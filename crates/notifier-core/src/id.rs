//! Run identity.
//!
//! A run is identified by a stable `(namespace, name)` pair, the same shape the
//! owning object store uses. Both parts follow DNS-compatible naming so a key
//! can be logged, used as a map key, or embedded in a webhook payload without
//! escaping.
//!
//! # Example
//!
//! ```rust
//! use notifier_core::RunKey;
//!
//! let key: RunKey = "ci/nightly-build.42".parse().unwrap();
//! assert_eq!(key.namespace(), "ci");
//! assert_eq!(key.name(), "nightly-build.42");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_NAMESPACE_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

/// The stable identity of a run record.
///
/// - Namespace: 1-63 characters, lowercase alphanumerics and hyphens, not
///   starting or ending with a hyphen
/// - Name: 1-253 characters, lowercase alphanumerics, hyphens and dots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    namespace: String,
    name: String,
}

impl RunKey {
    /// Creates a run key after validating both parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the namespace or name is malformed.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        validate_namespace(&namespace)?;
        validate_name(&name)?;
        Ok(Self { namespace, name })
    }

    /// Returns the namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for RunKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(Error::InvalidId {
                message: format!("run key '{s}' must have the form namespace/name"),
            });
        };
        Self::new(namespace, name)
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::InvalidId {
            message: "namespace cannot be empty".to_string(),
        });
    }

    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(Error::InvalidId {
            message: format!(
                "namespace '{namespace}' is too long (maximum {MAX_NAMESPACE_LEN} characters)"
            ),
        });
    }

    if !namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::InvalidId {
            message: format!(
                "namespace '{namespace}' contains invalid characters (only lowercase letters, digits, and hyphens allowed)"
            ),
        });
    }

    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(Error::InvalidId {
            message: format!("namespace '{namespace}' cannot start or end with a hyphen"),
        });
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidId {
            message: "run name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidId {
            message: format!("run name '{name}' is too long (maximum {MAX_NAME_LEN} characters)"),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(Error::InvalidId {
            message: format!(
                "run name '{name}' contains invalid characters (only lowercase letters, digits, hyphens, and dots allowed)"
            ),
        });
    }

    Ok(())
}
