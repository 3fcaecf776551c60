//! Transport envelopes.
//!
//! A plaintext envelope carries the message inline:
//!
//! ```json
//! {"moltspeak": "0.1", "envelope": {"encrypted": false, "compressed": false, "encoding": "utf-8"}, "message": {}}
//! ```
//!
//! An encrypted one replaces `message` with `ciphertext` and `algorithm`.
//! Unwrapping peels exactly one layer. If the payload is itself an
//! envelope the caller gets that envelope back and must unwrap again.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use moltspeak_types::{ErrorCode, MoltSpeakError, MoltSpeakResult, ValidationResult};
use moltspeak_types::{ENVELOPE_MARKER, PROTOCOL_VERSION};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

const ENCODING: &str = "utf-8";
const NONCE_LEN: usize = 12;

/// Envelope metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
    pub encoding: String,
}

/// A transport envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version marker.
    #[serde(rename = "moltspeak")]
    pub version: String,
    #[serde(rename = "envelope")]
    pub meta: EnvelopeMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Base64 ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

impl Envelope {
    pub fn to_value(&self) -> MoltSpeakResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_encrypted(&self) -> bool {
        self.meta.encrypted
    }
}

/// Encryption capability for sealing envelopes.
pub trait Encryptor: Send + Sync {
    fn algorithm(&self) -> &str;
    fn encrypt(&self, plaintext: &[u8]) -> MoltSpeakResult<Vec<u8>>;
}

/// Decryption capability for opening sealed envelopes.
pub trait Decryptor: Send + Sync {
    fn algorithm(&self) -> &str;
    fn decrypt(&self, ciphertext: &[u8]) -> MoltSpeakResult<Vec<u8>>;
}

/// AES-256-GCM with a random 96-bit nonce prepended to each ciphertext.
pub struct AesGcmCipher {
    key: Zeroizing<[u8; 32]>,
}

impl AesGcmCipher {
    pub const ALGORITHM: &'static str = "aes-256-gcm";

    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Key from 32 base64-encoded bytes.
    pub fn from_base64(encoded: &str) -> MoltSpeakResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|e| MoltSpeakError::InvalidParam(format!("invalid AES key: {e}")))?,
        );
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            MoltSpeakError::InvalidParam("AES-256 key must be 32 bytes".to_string())
        })?;
        Ok(Self::new(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }
}

impl Encryptor for AesGcmCipher {
    fn algorithm(&self) -> &str {
        Self::ALGORITHM
    }

    fn encrypt(&self, plaintext: &[u8]) -> MoltSpeakResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| MoltSpeakError::Internal(format!("encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

impl Decryptor for AesGcmCipher {
    fn algorithm(&self) -> &str {
        Self::ALGORITHM
    }

    fn decrypt(&self, ciphertext: &[u8]) -> MoltSpeakResult<Vec<u8>> {
        if ciphertext.len() <= NONCE_LEN {
            return Err(MoltSpeakError::Parse("ciphertext too short".to_string()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| MoltSpeakError::AuthFailed("ciphertext failed authentication".to_string()))
    }
}

/// Wrap a message (or another envelope) in a plaintext envelope.
pub fn wrap<T: Serialize + ?Sized>(message: &T, compressed: bool) -> MoltSpeakResult<Envelope> {
    Ok(Envelope {
        version: PROTOCOL_VERSION.to_string(),
        meta: EnvelopeMeta {
            encrypted: false,
            compressed: Some(compressed),
            encoding: ENCODING.to_string(),
        },
        message: Some(serde_json::to_value(message)?),
        ciphertext: None,
        algorithm: None,
    })
}

/// Encrypt a message into a sealed envelope.
pub fn seal<T: Serialize + ?Sized>(
    message: &T,
    encryptor: &dyn Encryptor,
) -> MoltSpeakResult<Envelope> {
    let plaintext = serde_json::to_vec(message)?;
    let ciphertext = encryptor.encrypt(&plaintext)?;
    Ok(Envelope {
        version: PROTOCOL_VERSION.to_string(),
        meta: EnvelopeMeta {
            encrypted: true,
            compressed: None,
            encoding: ENCODING.to_string(),
        },
        message: None,
        ciphertext: Some(STANDARD.encode(ciphertext)),
        algorithm: Some(encryptor.algorithm().to_string()),
    })
}

/// Whether a wire structure looks like an envelope rather than a message.
pub fn is_envelope(value: &Value) -> bool {
    value.get(ENVELOPE_MARKER).is_some()
        && (value.get("envelope").is_some() || value.get("ciphertext").is_some())
}

fn algorithm_of(value: &Value) -> Option<&str> {
    value
        .get("algorithm")
        .or_else(|| value.pointer("/envelope/algorithm"))
        .and_then(Value::as_str)
}

/// Check envelope shape.
pub fn validate_envelope(value: &Value) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(obj) = value.as_object() else {
        result.error(ErrorCode::Schema, "Envelope must be a JSON object");
        return result;
    };

    match obj.get(ENVELOPE_MARKER) {
        None | Some(Value::Null) => {
            result.error(ErrorCode::Schema, "Missing moltspeak version in envelope")
        }
        Some(v) if v.as_str() != Some(PROTOCOL_VERSION) => result.warn(format!(
            "Envelope version mismatch: expected {PROTOCOL_VERSION}, got {v}"
        )),
        Some(_) => {}
    }

    let encrypted = match obj.get("envelope") {
        None => false,
        Some(Value::Object(meta)) => meta.get("encrypted").and_then(Value::as_bool).unwrap_or(false),
        Some(_) => {
            result.error(ErrorCode::Schema, "Envelope metadata must be an object");
            false
        }
    };

    let has_message = obj.contains_key("message");
    let has_ciphertext = obj.contains_key("ciphertext");
    if !has_message && !has_ciphertext {
        result.error(
            ErrorCode::Schema,
            "Envelope must contain either a message or ciphertext",
        );
    } else if encrypted {
        if !has_ciphertext {
            result.error(ErrorCode::Schema, "Encrypted envelope missing ciphertext");
        }
    } else if !has_message {
        result.error(ErrorCode::Schema, "Unencrypted envelope missing message");
    }
    if encrypted && algorithm_of(value).is_none() {
        result.error(ErrorCode::Schema, "Encrypted envelope missing algorithm");
    }

    result
}

/// Unwrap one layer of a plaintext envelope.
///
/// Encrypted envelopes fail with a capability error; use [`unwrap_with`].
pub fn unwrap(envelope: &Value) -> MoltSpeakResult<Value> {
    unwrap_with(envelope, None)
}

/// Unwrap one layer, decrypting with `decryptor` when the envelope is
/// encrypted.
pub fn unwrap_with(envelope: &Value, decryptor: Option<&dyn Decryptor>) -> MoltSpeakResult<Value> {
    let validation = validate_envelope(envelope);
    if !validation.valid {
        return Err(MoltSpeakError::Schema {
            message: format!("Invalid envelope: {}", validation.error_summary()),
            field: None,
        });
    }

    let encrypted = envelope
        .pointer("/envelope/encrypted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !encrypted {
        return envelope
            .get("message")
            .cloned()
            .ok_or_else(|| MoltSpeakError::missing("message", "Unencrypted envelope missing message"));
    }

    let algorithm = algorithm_of(envelope).unwrap_or_default();
    let Some(decryptor) = decryptor else {
        return Err(MoltSpeakError::Capability(format!(
            "decryption ({algorithm}): cannot unwrap encrypted envelope without a decryption capability"
        )));
    };
    if decryptor.algorithm() != algorithm {
        return Err(MoltSpeakError::Capability(format!(
            "decryption ({algorithm}): supplied decryptor handles {}",
            decryptor.algorithm()
        )));
    }

    let encoded = envelope
        .get("ciphertext")
        .and_then(Value::as_str)
        .ok_or_else(|| MoltSpeakError::missing("ciphertext", "ciphertext must be a string"))?;
    let ciphertext = STANDARD
        .decode(encoded)
        .map_err(|e| MoltSpeakError::Parse(format!("ciphertext is not valid base64: {e}")))?;
    let plaintext = decryptor.decrypt(&ciphertext)?;
    debug!(algorithm, bytes = plaintext.len(), "Decrypted envelope");
    Ok(serde_json::from_slice(&plaintext)?)
}
