//! Canonical message signing and verification.
//!
//! The signing scheme:
//! 1. Drop the top-level `sig` field.
//! 2. Serialize what remains with object keys sorted lexicographically at
//!    every depth and no insignificant whitespace. Structurally equal
//!    messages produce identical bytes regardless of field order.
//! 3. Hand the bytes to a [`SignatureScheme`].
//! 4. Store the result as `"<scheme>:<base64>"` in `sig`.
//!
//! Verification recomputes the canonical bytes, strips the scheme tag and
//! delegates to the same scheme. A missing signature is `Ok(false)`; a
//! missing key is a configuration error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use moltspeak_types::{Message, MoltSpeakError, MoltSpeakResult};
use rand::rngs::OsRng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// A pluggable signing backend.
///
/// Implementations may block (hardware keys, remote signers); see
/// [`sign_offloaded`] and [`verify_offloaded`] for async callers.
pub trait SignatureScheme: Send + Sync {
    /// Tag written before the signature, e.g. `ed25519`.
    fn name(&self) -> &str;

    /// Sign canonical bytes.
    fn sign(&self, canonical: &[u8], private_key: &str) -> MoltSpeakResult<Vec<u8>>;

    /// Check a signature. Malformed keys or signatures are `false`.
    fn verify(&self, canonical: &[u8], signature: &[u8], public_key: &str) -> bool;
}

/// Ed25519 over the canonical bytes. Keys are base64: a 32-byte seed for
/// signing, a 32-byte public key for verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

fn decode_key32(encoded: &str) -> Option<[u8; 32]> {
    STANDARD.decode(encoded).ok()?.as_slice().try_into().ok()
}

impl SignatureScheme for Ed25519Scheme {
    fn name(&self) -> &str {
        "ed25519"
    }

    fn sign(&self, canonical: &[u8], private_key: &str) -> MoltSpeakResult<Vec<u8>> {
        let seed = decode_key32(private_key).ok_or_else(|| {
            MoltSpeakError::InvalidParam(
                "Ed25519 private key must be 32 base64-encoded bytes".to_string(),
            )
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(signing_key.sign(canonical).to_bytes().to_vec())
    }

    fn verify(&self, canonical: &[u8], signature: &[u8], public_key: &str) -> bool {
        let Some(pk_bytes) = decode_key32(public_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(canonical, &signature).is_ok()
    }
}

/// HMAC-SHA256 with a shared secret, for peers that already share one.
/// The same secret is passed as both private and public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Scheme;

impl SignatureScheme for HmacSha256Scheme {
    fn name(&self) -> &str {
        "hmac-sha256"
    }

    fn sign(&self, canonical: &[u8], private_key: &str) -> MoltSpeakResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
            .map_err(|e| MoltSpeakError::InvalidParam(format!("invalid HMAC key: {e}")))?;
        mac.update(canonical);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, canonical: &[u8], signature: &[u8], public_key: &str) -> bool {
        match self.sign(canonical, public_key) {
            Ok(expected) => expected.ct_eq(signature).into(),
            Err(_) => false,
        }
    }
}

/// Generate an Ed25519 keypair as `(private_base64, public_base64)`.
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (
        STANDARD.encode(signing_key.to_bytes()),
        STANDARD.encode(signing_key.verifying_key().to_bytes()),
    )
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Canonical bytes of a wire structure, excluding any top-level `sig`.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    match value {
        Value::Object(map) if map.contains_key("sig") => {
            let mut unsigned = map.clone();
            unsigned.remove("sig");
            write_canonical(&Value::Object(unsigned), &mut out);
        }
        other => write_canonical(other, &mut out),
    }
    out.into_bytes()
}

/// Canonical bytes of a typed message.
pub fn canonical_bytes(message: &Message) -> MoltSpeakResult<Vec<u8>> {
    Ok(canonicalize(&message.to_value()?))
}

/// Hex SHA-256 of the canonical bytes. Identifies a message in logs
/// without revealing it.
pub fn fingerprint(value: &Value) -> String {
    hex::encode(Sha256::digest(canonicalize(value)))
}

/// Sign a wire structure, returning a signed copy.
pub fn sign_value(
    value: &Value,
    scheme: &dyn SignatureScheme,
    private_key: &str,
) -> MoltSpeakResult<Value> {
    if private_key.is_empty() {
        return Err(MoltSpeakError::InvalidParam(
            "Private key required for signing".to_string(),
        ));
    }
    let Value::Object(map) = value else {
        return Err(MoltSpeakError::missing("sig", "Only JSON objects can be signed"));
    };
    let signature = scheme.sign(&canonicalize(value), private_key)?;
    let mut signed = map.clone();
    signed.insert(
        "sig".to_string(),
        Value::String(format!("{}:{}", scheme.name(), STANDARD.encode(signature))),
    );
    Ok(Value::Object(signed))
}

/// Verify the `sig` of a wire structure.
pub fn verify_value(
    value: &Value,
    scheme: &dyn SignatureScheme,
    public_key: &str,
) -> MoltSpeakResult<bool> {
    let Some(tagged) = value.get("sig").and_then(Value::as_str) else {
        return Ok(false);
    };
    if public_key.is_empty() {
        return Err(MoltSpeakError::InvalidParam(
            "Public key required for verification".to_string(),
        ));
    }
    let Some((tag, encoded)) = tagged.split_once(':') else {
        debug!("Signature has no scheme tag");
        return Ok(false);
    };
    if tag != scheme.name() {
        debug!(expected = scheme.name(), actual = tag, "Signature scheme mismatch");
        return Ok(false);
    }
    let Ok(signature) = STANDARD.decode(encoded) else {
        debug!("Signature is not valid base64");
        return Ok(false);
    };
    let ok = scheme.verify(&canonicalize(value), &signature, public_key);
    if !ok {
        debug!(fingerprint = %fingerprint(value), "Signature verification failed");
    }
    Ok(ok)
}

/// Sign a message. The original is left untouched.
pub fn sign_message(
    message: &Message,
    scheme: &dyn SignatureScheme,
    private_key: &str,
) -> MoltSpeakResult<Message> {
    let signed = sign_value(&message.to_value()?, scheme, private_key)?;
    Message::from_value(signed)
}

/// Verify a message's signature.
///
/// This checks the typed message's own serialization, which omits explicit
/// `null`s and unknown keys. For messages received from a peer use
/// [`Inbound::verify`](crate::codec::Inbound::verify), which checks the
/// structure that was actually signed.
pub fn verify_message(
    message: &Message,
    scheme: &dyn SignatureScheme,
    public_key: &str,
) -> MoltSpeakResult<bool> {
    if message.signature.is_none() {
        return Ok(false);
    }
    verify_value(&message.to_value()?, scheme, public_key)
}

/// [`sign_message`] on tokio's blocking pool.
pub async fn sign_offloaded(
    message: Message,
    scheme: Arc<dyn SignatureScheme>,
    private_key: String,
) -> MoltSpeakResult<Message> {
    tokio::task::spawn_blocking(move || sign_message(&message, scheme.as_ref(), &private_key))
        .await
        .map_err(|e| MoltSpeakError::Internal(format!("signing task failed: {e}")))?
}

/// [`verify_message`] on tokio's blocking pool.
pub async fn verify_offloaded(
    message: Message,
    scheme: Arc<dyn SignatureScheme>,
    public_key: String,
) -> MoltSpeakResult<bool> {
    tokio::task::spawn_blocking(move || verify_message(&message, scheme.as_ref(), &public_key))
        .await
        .map_err(|e| MoltSpeakError::Internal(format!("verification task failed: {e}")))?
}
