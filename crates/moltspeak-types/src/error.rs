//! Shared error types for the MoltSpeak protocol.
//!
//! These are hard failures: programmer or configuration misuse, malformed
//! input that cannot be parsed, or a capability the caller did not supply.
//! A message that merely breaks protocol rules is reported through
//! [`ValidationResult`](crate::validation::ValidationResult) instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wire error-code vocabulary carried in `error` operation payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_PARSE")]
    Parse,
    #[serde(rename = "E_VERSION")]
    Version,
    #[serde(rename = "E_SCHEMA")]
    Schema,
    #[serde(rename = "E_MISSING_FIELD")]
    MissingField,
    #[serde(rename = "E_INVALID_PARAM")]
    InvalidParam,
    #[serde(rename = "E_AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "E_SIGNATURE")]
    Signature,
    #[serde(rename = "E_CAPABILITY")]
    Capability,
    #[serde(rename = "E_CONSENT")]
    Consent,
    #[serde(rename = "E_CLASSIFICATION")]
    Classification,
    #[serde(rename = "E_RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_TASK_FAILED")]
    TaskFailed,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// The stable wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Parse => "E_PARSE",
            ErrorCode::Version => "E_VERSION",
            ErrorCode::Schema => "E_SCHEMA",
            ErrorCode::MissingField => "E_MISSING_FIELD",
            ErrorCode::InvalidParam => "E_INVALID_PARAM",
            ErrorCode::AuthFailed => "E_AUTH_FAILED",
            ErrorCode::Signature => "E_SIGNATURE",
            ErrorCode::Capability => "E_CAPABILITY",
            ErrorCode::Consent => "E_CONSENT",
            ErrorCode::Classification => "E_CLASSIFICATION",
            ErrorCode::RateLimit => "E_RATE_LIMIT",
            ErrorCode::Timeout => "E_TIMEOUT",
            ErrorCode::TaskFailed => "E_TASK_FAILED",
            ErrorCode::Internal => "E_INTERNAL",
        }
    }

    /// Coarse category reported alongside the code in error payloads.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::Parse | ErrorCode::Version => "protocol",
            ErrorCode::Schema | ErrorCode::MissingField | ErrorCode::InvalidParam => {
                "validation"
            }
            ErrorCode::AuthFailed | ErrorCode::Signature | ErrorCode::Capability => "auth",
            ErrorCode::Consent | ErrorCode::Classification => "privacy",
            ErrorCode::RateLimit => "transport",
            ErrorCode::Timeout | ErrorCode::TaskFailed | ErrorCode::Internal => "execution",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for MoltSpeak operations.
#[derive(Error, Debug)]
pub enum MoltSpeakError {
    /// Message or envelope structure is unusable.
    #[error("Schema error: {message}")]
    Schema {
        /// What was wrong.
        message: String,
        /// The offending wire field, when one can be named.
        field: Option<String>,
    },

    /// A signature could not be produced or checked.
    #[error("Signature error: {0}")]
    Signature(String),

    /// A required capability was not supplied.
    #[error("Required capability not held: {0}")]
    Capability(String),

    /// PII would be transmitted without consent.
    #[error("PII transmitted without consent: {}", pii_types.join(", "))]
    Consent {
        /// The PII categories involved.
        pii_types: Vec<String>,
    },

    /// The peer is sending too fast.
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Suggested backoff before retrying.
        retry_after_ms: Option<u64>,
    },

    /// An operation did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Input could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The peer speaks an incompatible protocol version.
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    Version {
        /// Our protocol version.
        expected: String,
        /// The version the peer declared.
        actual: String,
    },

    /// A caller-supplied parameter is missing or malformed.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MoltSpeakError {
    /// Shorthand for a schema error tied to a wire field.
    pub fn missing(field: &str, message: impl Into<String>) -> Self {
        MoltSpeakError::Schema {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// The wire error code matching this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            MoltSpeakError::Schema { .. } => ErrorCode::Schema,
            MoltSpeakError::Signature(_) => ErrorCode::Signature,
            MoltSpeakError::Capability(_) => ErrorCode::Capability,
            MoltSpeakError::Consent { .. } => ErrorCode::Consent,
            MoltSpeakError::RateLimit { .. } => ErrorCode::RateLimit,
            MoltSpeakError::Timeout(_) => ErrorCode::Timeout,
            MoltSpeakError::AuthFailed(_) => ErrorCode::AuthFailed,
            MoltSpeakError::Parse(_) => ErrorCode::Parse,
            MoltSpeakError::Version { .. } => ErrorCode::Version,
            MoltSpeakError::InvalidParam(_) => ErrorCode::InvalidParam,
            MoltSpeakError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the caller may retry after correcting its input.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            MoltSpeakError::Schema { .. }
                | MoltSpeakError::Consent { .. }
                | MoltSpeakError::RateLimit { .. }
                | MoltSpeakError::Timeout(_)
                | MoltSpeakError::InvalidParam(_)
        )
    }
}

impl From<serde_json::Error> for MoltSpeakError {
    fn from(e: serde_json::Error) -> Self {
        MoltSpeakError::Parse(e.to_string())
    }
}

/// Alias for Result with MoltSpeakError.
pub type MoltSpeakResult<T> = Result<T, MoltSpeakError>;
