//! MoltSpeak wire protocol: the boundary checks for agent-to-agent messages.
//!
//! Outbound: build, validate, sign, encode (optionally inside an envelope).
//! Inbound: decode, unwrap, validate, verify, and answer failures with an
//! `error` message.
//!
//! ## Architecture
//!
//! - **validate**: structural, temporal, size and policy checks producing a
//!   [`ValidationResult`](moltspeak_types::ValidationResult)
//! - **pii**: pattern-based PII detection, masking and redaction
//! - **policy**: rules attached to each classification level
//! - **signing**: canonical form plus pluggable [`SignatureScheme`]s
//! - **envelope**: transport wrapper, plaintext or sealed with an [`Encryptor`]
//! - **codec**: JSON text in and out; [`Inbound`] keeps the received
//!   structure for signature checks
//! - **builder** / **ops**: message construction and standard operations

pub mod builder;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod ops;
pub mod pii;
pub mod policy;
pub mod signing;
pub mod validate;

pub use builder::MessageBuilder;
pub use codec::{
    decode, decode_inbound, decode_message, decode_with, encode, DecodeOptions, Decoded, Decoder,
    EncodeOptions, Inbound,
};
pub use config::{load_config, parse_config};
pub use envelope::{
    seal, unwrap, unwrap_with, validate_envelope, wrap, AesGcmCipher, Decryptor, Encryptor, Envelope,
};
pub use ops::{ErrorDetails, TaskSpec};
pub use pii::{PiiCategory, PiiReport};
pub use signing::{
    generate_keypair, sign_message, verify_message, Ed25519Scheme, HmacSha256Scheme,
    SignatureScheme,
};
pub use validate::{validate_message, validate_value, ValidationOptions, Validator};
