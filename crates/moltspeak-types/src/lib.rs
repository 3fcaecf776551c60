//! Core types for the MoltSpeak agent-to-agent protocol.
//!
//! This crate defines the message model, protocol constants, error
//! vocabulary, validation outcome and configuration shared by every
//! MoltSpeak component. It contains no business logic.

pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod validation;

pub use error::{ErrorCode, MoltSpeakError, MoltSpeakResult};
pub use message::{AgentRef, Classification, Consent, Message, Operation, PiiMeta};
pub use protocol::{SizeLimits, ENVELOPE_MARKER, PROTOCOL_VERSION};
pub use validation::{Suggestion, ValidationResult};
