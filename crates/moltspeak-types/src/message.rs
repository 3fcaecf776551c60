//! The MoltSpeak message model.
//!
//! Field names on the wire are compact (`v`, `ts`, `op`, `cls`, ...); the
//! Rust names spell them out. Operation and classification strings that
//! this build does not know still deserialize, into an `Unrecognized`
//! variant, so validation can flag them instead of the parser rejecting
//! the whole message.

use crate::error::MoltSpeakResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Message operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Hello,
    Verify,
    Query,
    Respond,
    Task,
    Stream,
    Tool,
    Consent,
    Error,
    /// An operation name outside the known set.
    Unrecognized(String),
}

impl Operation {
    /// All operations defined by this protocol version.
    pub const KNOWN: [Operation; 9] = [
        Operation::Hello,
        Operation::Verify,
        Operation::Query,
        Operation::Respond,
        Operation::Task,
        Operation::Stream,
        Operation::Tool,
        Operation::Consent,
        Operation::Error,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Hello => "hello",
            Operation::Verify => "verify",
            Operation::Query => "query",
            Operation::Respond => "respond",
            Operation::Task => "task",
            Operation::Stream => "stream",
            Operation::Tool => "tool",
            Operation::Consent => "consent",
            Operation::Error => "error",
            Operation::Unrecognized(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Operation::Unrecognized(_))
    }
}

impl From<&str> for Operation {
    fn from(s: &str) -> Self {
        match s {
            "hello" => Operation::Hello,
            "verify" => Operation::Verify,
            "query" => Operation::Query,
            "respond" => Operation::Respond,
            "task" => Operation::Task,
            "stream" => Operation::Stream,
            "tool" => Operation::Tool,
            "consent" => Operation::Consent,
            "error" => Operation::Error,
            other => Operation::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Operation {
    fn from(s: String) -> Self {
        Operation::from(s.as_str())
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Unrecognized(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared sensitivity of a message's payload.
///
/// The levels are listed from least to most sensitive, but each carries
/// its own rules; they are not compared against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Classification {
    /// Safe for anyone.
    Public,
    /// Agent-to-agent only.
    Internal,
    /// Sensitive business data.
    Confidential,
    /// Personal data; requires consent metadata.
    Pii,
    /// Credentials and keys; never leaves the organization.
    Secret,
    /// A classification label outside the known set.
    Unrecognized(String),
}

impl Classification {
    /// All classifications defined by this protocol version.
    pub const KNOWN: [Classification; 5] = [
        Classification::Public,
        Classification::Internal,
        Classification::Confidential,
        Classification::Pii,
        Classification::Secret,
    ];

    /// The compact wire label (`pub`, `int`, `conf`, `pii`, `sec`).
    pub fn as_str(&self) -> &str {
        match self {
            Classification::Public => "pub",
            Classification::Internal => "int",
            Classification::Confidential => "conf",
            Classification::Pii => "pii",
            Classification::Secret => "sec",
            Classification::Unrecognized(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Classification::Unrecognized(_))
    }
}

impl From<&str> for Classification {
    fn from(s: &str) -> Self {
        match s {
            "pub" => Classification::Public,
            "int" => Classification::Internal,
            "conf" => Classification::Confidential,
            "pii" => Classification::Pii,
            "sec" => Classification::Secret,
            other => Classification::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Classification {
    fn from(s: String) -> Self {
        Classification::from(s.as_str())
    }
}

impl From<Classification> for String {
    fn from(cls: Classification) -> Self {
        match cls {
            Classification::Unrecognized(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one party of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    /// Agent name.
    pub agent: String,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Public signing key reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Public encryption key reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_key: Option<String>,
}

impl AgentRef {
    pub fn new(agent: impl Into<String>, org: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            org: Some(org.into()),
            key: None,
            enc_key: None,
        }
    }

    /// Attach a public signing key reference.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach a public encryption key reference.
    pub fn with_enc_key(mut self, enc_key: impl Into<String>) -> Self {
        self.enc_key = Some(enc_key.into());
        self
    }
}

/// Proof that transmitting personal data was authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    /// Who granted consent (user identifier).
    #[serde(default)]
    pub granted_by: String,
    /// What the data will be used for.
    #[serde(default)]
    pub purpose: String,
    /// Consent token. Empty means no consent.
    #[serde(default)]
    pub proof: String,
    /// Consent expiry, epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    /// Usage scope, e.g. `internal_only`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Metadata required on `pii`-classified messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMeta {
    /// Data-type tags (`email`, `phone`, `name`, ...).
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub consent: Consent,
    /// Payload fields the recipient should mask when displaying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_fields: Option<Vec<String>>,
}

impl PiiMeta {
    pub fn new(
        types: Vec<String>,
        granted_by: impl Into<String>,
        purpose: impl Into<String>,
        proof: impl Into<String>,
    ) -> Self {
        Self {
            types,
            consent: Consent {
                granted_by: granted_by.into(),
                purpose: purpose.into(),
                proof: proof.into(),
                expires: None,
                scope: None,
            },
            mask_fields: None,
        }
    }

    /// True when a non-empty consent proof is attached.
    pub fn has_consent_proof(&self) -> bool {
        !self.consent.proof.is_empty()
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version.
    #[serde(rename = "v")]
    pub version: String,
    /// Message identifier, UUID-v4 text recommended.
    pub id: String,
    /// Creation time, epoch ms.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "op")]
    pub operation: Operation,
    /// Sender. Always set by the builder; optional on lenient ingress.
    #[serde(rename = "from", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<AgentRef>,
    #[serde(rename = "to", default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<AgentRef>,
    /// Operation-specific payload.
    #[serde(rename = "p", default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Always set by the builder; optional on lenient ingress.
    #[serde(rename = "cls", default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// `"<scheme>:<base64>"`.
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Id of the message this one replies to.
    #[serde(rename = "re", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Expiry, epoch ms.
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    /// Capabilities the recipient requires of the sender.
    #[serde(rename = "cap", default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_meta: Option<PiiMeta>,
    /// Namespace to extension payload.
    #[serde(rename = "ext", default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, Value>>,
}

impl Message {
    /// Convert to the untyped wire structure.
    pub fn to_value(&self) -> MoltSpeakResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse from the untyped wire structure.
    pub fn from_value(value: Value) -> MoltSpeakResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Sender organization, if any.
    pub fn sender_org(&self) -> Option<&str> {
        self.sender.as_ref().and_then(|s| s.org.as_deref())
    }

    /// Recipient organization, if any.
    pub fn recipient_org(&self) -> Option<&str> {
        self.recipient.as_ref().and_then(|r| r.org.as_deref())
    }
}
