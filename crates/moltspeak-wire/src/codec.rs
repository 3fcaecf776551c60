//! JSON text encoding and decoding.
//!
//! Decoding parses, optionally peels one envelope layer, runs structural
//! validation (non-strict, no PII scan) and only then deserializes into a
//! typed [`Message`]. The received wire structure is kept alongside it for
//! signature checks.

use crate::envelope::{self, Decryptor};
use crate::signing::{self, SignatureScheme};
use crate::validate::{ValidationOptions, Validator};
use moltspeak_types::config::{EnvelopeConfig, ProtocolConfig};
use moltspeak_types::{Message, MoltSpeakError, MoltSpeakResult};
use serde_json::Value;
use tracing::debug;

/// Encoding flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Indent the output.
    pub pretty: bool,
    /// Wrap in a plaintext envelope first.
    pub envelope: bool,
    /// Value of the envelope's `compressed` flag.
    pub compressed: bool,
}

impl From<&EnvelopeConfig> for EncodeOptions {
    fn from(config: &EnvelopeConfig) -> Self {
        Self {
            pretty: false,
            envelope: true,
            compressed: config.compress_by_default,
        }
    }
}

/// Decoding flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject structurally invalid messages.
    pub validate: bool,
    /// Peel an envelope if the text holds one.
    pub unwrap: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            validate: true,
            unwrap: true,
        }
    }
}

/// A decoded message and the wire structure it was read from.
///
/// The typed [`Message`] drops explicit `null`s and keys it does not know,
/// so signatures are checked against `raw`, which holds exactly what the
/// peer signed.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message: Message,
    pub raw: Value,
}

impl Inbound {
    /// Verify the signature over the received wire structure.
    pub fn verify(&self, scheme: &dyn SignatureScheme, public_key: &str) -> MoltSpeakResult<bool> {
        signing::verify_value(&self.raw, scheme, public_key)
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

/// What [`decode`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Box<Inbound>),
    /// An envelope left wrapped because unwrapping was disabled.
    Envelope(Value),
}

impl Decoded {
    pub fn into_inbound(self) -> Option<Inbound> {
        match self {
            Decoded::Message(inbound) => Some(*inbound),
            Decoded::Envelope(_) => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        self.into_inbound().map(Inbound::into_message)
    }
}

/// Serialize a message to JSON text.
pub fn encode(message: &Message, opts: EncodeOptions) -> MoltSpeakResult<String> {
    let value = if opts.envelope {
        envelope::wrap(message, opts.compressed)?.to_value()?
    } else {
        message.to_value()?
    };
    let text = if opts.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    Ok(text)
}

/// Decodes inbound text with configured limits and an optional
/// decryption capability.
pub struct Decoder<'a> {
    validator: Validator,
    decryptor: Option<&'a dyn Decryptor>,
}

impl Default for Decoder<'_> {
    fn default() -> Self {
        Self::new(Validator::default())
    }
}

impl<'a> Decoder<'a> {
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            decryptor: None,
        }
    }

    /// Use the replay window and size limit from `config`.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(Validator::new(config.validation.clone()))
    }

    /// Open sealed envelopes with `decryptor`.
    pub fn with_decryptor(mut self, decryptor: &'a dyn Decryptor) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn decode(&self, text: &str, opts: DecodeOptions) -> MoltSpeakResult<Decoded> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| MoltSpeakError::Parse(format!("Invalid JSON: {e}")))?;

        if envelope::is_envelope(&value) {
            if !opts.unwrap {
                return Ok(Decoded::Envelope(value));
            }
            value = envelope::unwrap_with(&value, self.decryptor)?;
        }

        if opts.validate {
            let result = self
                .validator
                .validate_value(&value, ValidationOptions::structural());
            if !result.valid {
                debug!(errors = result.errors.len(), "Rejected inbound message");
                return Err(MoltSpeakError::Schema {
                    message: format!("Invalid message: {}", result.error_summary()),
                    field: None,
                });
            }
        }

        let message = Message::from_value(value.clone())?;
        Ok(Decoded::Message(Box::new(Inbound {
            message,
            raw: value,
        })))
    }

    /// Decode, unwrapping and validating, keeping the wire structure.
    pub fn decode_inbound(&self, text: &str) -> MoltSpeakResult<Inbound> {
        self.decode(text, DecodeOptions::default())?
            .into_inbound()
            .ok_or_else(|| MoltSpeakError::Internal("envelope left wrapped".to_string()))
    }

    pub fn decode_message(&self, text: &str) -> MoltSpeakResult<Message> {
        self.decode_inbound(text).map(Inbound::into_message)
    }
}

/// Parse JSON text with default limits.
pub fn decode(text: &str, opts: DecodeOptions) -> MoltSpeakResult<Decoded> {
    Decoder::default().decode(text, opts)
}

/// [`decode`] with a decryption capability for sealed envelopes.
pub fn decode_with(
    text: &str,
    opts: DecodeOptions,
    decryptor: Option<&dyn Decryptor>,
) -> MoltSpeakResult<Decoded> {
    let mut decoder = Decoder::default();
    decoder.decryptor = decryptor;
    decoder.decode(text, opts)
}

/// Decode with default limits and keep the wire structure for
/// [`Inbound::verify`].
pub fn decode_inbound(text: &str) -> MoltSpeakResult<Inbound> {
    Decoder::default().decode_inbound(text)
}

/// Decode, unwrapping and validating, and require a message.
pub fn decode_message(text: &str) -> MoltSpeakResult<Message> {
    Decoder::default().decode_message(text)
}
