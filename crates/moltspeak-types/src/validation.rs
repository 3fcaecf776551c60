//! Validation outcome value.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Corrective action a peer can take after a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Suggestion {
    /// Obtain consent for these data types and resend as `pii`.
    RequestConsent { data_types: Vec<String> },
    /// Shrink the message below this many bytes.
    ReduceSize { max_bytes: usize },
}

/// Result of validating a message or envelope.
///
/// Errors make the result invalid; warnings never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Wire code of the first error recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// An empty, valid result.
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            code: None,
            suggestion: None,
        }
    }

    /// Record an error. The first error's code becomes the result's code.
    pub fn error(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.valid = false;
        self.code.get_or_insert(code);
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Keep the first suggestion offered.
    pub fn suggest(&mut self, suggestion: Suggestion) {
        self.suggestion.get_or_insert(suggestion);
    }

    /// All errors joined with `"; "`.
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}
