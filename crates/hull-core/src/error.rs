// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability error taxonomy.
//!
//! Every primitive returns one of these five tags; none of them ever
//! panics the host. The runtime bridge converts a [`CapError`] into a
//! script-side exception carrying the stable code string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the capability layer.
pub type CapResult<T> = Result<T, CapError>;

/// A typed failure surfaced by a capability primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapError {
    /// The manifest or sandbox does not permit the operation.
    #[error("denied: {0}")]
    Denied(String),

    /// The arguments are malformed (bad path, bad URL, wrong type).
    #[error("invalid: {0}")]
    Invalid(String),

    /// The target resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying OS or library operation failed.
    #[error("io failure: {0}")]
    IoFailure(String),

    /// A bug or unexpected state inside the host.
    #[error("internal: {0}")]
    Internal(String),
}

impl CapError {
    /// Stable machine-readable code for this error.
    ///
    /// These strings are part of the script-facing contract and never
    /// change across releases.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Denied(_) => "DENIED",
            Self::Invalid(_) => "INVALID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::IoFailure(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Payload handed to the scripting bridge: `{code, message}`.
    #[must_use]
    pub fn to_script_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<std::io::Error> for CapError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::Denied(err.to_string()),
            _ => Self::IoFailure(err.to_string()),
        }
    }
}
