//! Protocol configuration types.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::protocol::{SizeLimits, DEFAULT_REPLAY_WINDOW_MS};
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub validation: ValidationConfig,
    pub envelope: EnvelopeConfig,
}

/// Limits and default flags for the validation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum accepted message age in milliseconds.
    pub replay_window_ms: u64,
    /// Maximum serialized message size in bytes.
    pub max_message_bytes: usize,
    /// Require `from` and `cls` in addition to the baseline fields.
    pub strict: bool,
    /// Scan payloads of non-`pii` messages for undeclared personal data.
    pub check_pii: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            replay_window_ms: DEFAULT_REPLAY_WINDOW_MS,
            max_message_bytes: SizeLimits::SINGLE_MESSAGE,
            strict: true,
            check_pii: true,
        }
    }
}

/// Envelope codec defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Value of the `compressed` flag when the caller does not choose one.
    pub compress_by_default: bool,
}
