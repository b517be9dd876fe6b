//! Human handle: email + display label identifying a person
//!
//! Most members carry one; outsiders enrolled without an email address do
//! not, which is why the handshake passes `Option<HumanHandle>` around.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when building a [`HumanHandle`] from raw parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HumanHandleError {
    /// The email address is empty or missing an `@`
    #[error("Invalid email address")]
    InvalidEmail,
    /// The display label is empty or too long
    #[error("Invalid display label")]
    InvalidLabel,
}

/// Email address plus human-readable display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanHandle {
    email: String,
    label: String,
}

impl HumanHandle {
    /// Maximum length of the label, in bytes.
    pub const MAX_LABEL_LEN: usize = 254;

    /// Build a handle, validating both parts.
    ///
    /// Validation is deliberately light: the server is the authority on what
    /// it accepts, this is only an early sanity check for UIs.
    pub fn new(email: impl Into<String>, label: impl Into<String>) -> Result<Self, HumanHandleError> {
        let email = email.into();
        let label = label.into();
        if email.is_empty() || !email.contains('@') {
            return Err(HumanHandleError::InvalidEmail);
        }
        if label.is_empty() || label.len() > Self::MAX_LABEL_LEN {
            return Err(HumanHandleError::InvalidLabel);
        }
        Ok(Self { email, label })
    }

    /// The email address
    pub fn email(&self) -> &str {
        &self.email
    }

    /// The display label
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.label, self.email)
    }
}
