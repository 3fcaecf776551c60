//! Classification policy.
//!
//! Each classification level carries its own rules:
//!
//! | level  | consent proof | same-org only | may be logged | encrypt in transit |
//! |--------|---------------|---------------|---------------|--------------------|
//! | `pub`  |               |               | yes           |                    |
//! | `int`  |               |               | yes           |                    |
//! | `conf` |               |               | yes           | yes                |
//! | `pii`  | yes           |               | yes           | yes                |
//! | `sec`  |               | yes           | no            | yes                |
//!
//! The policy only reports requirements. Encryption is the envelope
//! codec's job and logging decisions belong to the caller.

use moltspeak_types::{Classification, ErrorCode, Message};
use serde_json::Value;
use std::fmt;

/// Whether messages of this classification may be written to logs or
/// durable stores. Unrecognized labels are treated as secret.
pub fn can_log(cls: &Classification) -> bool {
    match cls {
        Classification::Public
        | Classification::Internal
        | Classification::Confidential
        | Classification::Pii => true,
        Classification::Secret | Classification::Unrecognized(_) => false,
    }
}

/// Whether messages of this classification must be encrypted in transit.
pub fn must_encrypt(cls: &Classification) -> bool {
    match cls {
        Classification::Public | Classification::Internal => false,
        Classification::Confidential
        | Classification::Pii
        | Classification::Secret
        | Classification::Unrecognized(_) => true,
    }
}

/// Whether messages of this classification need consent metadata.
pub fn requires_consent(cls: &Classification) -> bool {
    match cls {
        Classification::Pii => true,
        Classification::Public
        | Classification::Internal
        | Classification::Confidential
        | Classification::Secret
        | Classification::Unrecognized(_) => false,
    }
}

/// Whether sender and recipient must belong to the same organization.
pub fn same_org_only(cls: &Classification) -> bool {
    match cls {
        Classification::Secret => true,
        Classification::Public
        | Classification::Internal
        | Classification::Confidential
        | Classification::Pii
        | Classification::Unrecognized(_) => false,
    }
}

/// A broken classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// `pii` without any `pii_meta`.
    MissingPiiMeta,
    /// `pii_meta` present but its consent proof is empty.
    MissingConsentProof,
    /// `sec` between different (or unknown) organizations.
    CrossOrgSecret {
        sender_org: Option<String>,
        recipient_org: Option<String>,
    },
}

impl PolicyViolation {
    pub fn code(&self) -> ErrorCode {
        match self {
            PolicyViolation::MissingPiiMeta | PolicyViolation::MissingConsentProof => {
                ErrorCode::Consent
            }
            PolicyViolation::CrossOrgSecret { .. } => ErrorCode::Classification,
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::MissingPiiMeta => {
                write!(f, "PII classification requires pii_meta with consent")
            }
            PolicyViolation::MissingConsentProof => {
                write!(f, "PII classification requires consent proof")
            }
            PolicyViolation::CrossOrgSecret {
                sender_org,
                recipient_org,
            } => write!(
                f,
                "SECRET classification cannot be transmitted across organizations (from: {}, to: {})",
                sender_org.as_deref().unwrap_or("<none>"),
                recipient_org.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

/// The parts of a message the policy looks at.
#[derive(Debug, Clone)]
pub struct PolicySubject<'a> {
    pub classification: Classification,
    pub has_pii_meta: bool,
    pub consent_proof: Option<&'a str>,
    pub sender_org: Option<&'a str>,
    pub recipient_org: Option<&'a str>,
}

impl<'a> PolicySubject<'a> {
    /// Extract from a typed message. `None` if it has no classification.
    pub fn from_message(message: &'a Message) -> Option<Self> {
        let classification = message.classification.clone()?;
        let pii_meta = message.pii_meta.as_ref();
        Some(Self {
            classification,
            has_pii_meta: pii_meta.is_some(),
            consent_proof: pii_meta.map(|m| m.consent.proof.as_str()),
            sender_org: message.sender_org(),
            recipient_org: message.recipient_org(),
        })
    }

    /// Extract from a wire structure. `None` if `cls` is absent or not a
    /// string.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        let classification = Classification::from(value.get("cls")?.as_str()?);
        let pii_meta = value.get("pii_meta").filter(|m| !m.is_null());
        Some(Self {
            classification,
            has_pii_meta: pii_meta.is_some(),
            consent_proof: pii_meta
                .and_then(|m| m.get("consent"))
                .and_then(|c| c.get("proof"))
                .and_then(Value::as_str),
            sender_org: value.pointer("/from/org").and_then(Value::as_str),
            recipient_org: value.pointer("/to/org").and_then(Value::as_str),
        })
    }
}

/// Evaluate the classification rules.
pub fn evaluate(subject: &PolicySubject<'_>) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();
    let cls = &subject.classification;

    if requires_consent(cls) {
        if !subject.has_pii_meta {
            violations.push(PolicyViolation::MissingPiiMeta);
        } else if subject.consent_proof.map_or(true, str::is_empty) {
            violations.push(PolicyViolation::MissingConsentProof);
        }
    }

    if same_org_only(cls) {
        let same = matches!(
            (subject.sender_org, subject.recipient_org),
            (Some(a), Some(b)) if a == b
        );
        if !same {
            violations.push(PolicyViolation::CrossOrgSecret {
                sender_org: subject.sender_org.map(str::to_string),
                recipient_org: subject.recipient_org.map(str::to_string),
            });
        }
    }

    violations
}

/// Check a typed message before sending it.
pub fn check(message: &Message) -> Vec<PolicyViolation> {
    PolicySubject::from_message(message)
        .map(|subject| evaluate(&subject))
        .unwrap_or_default()
}
