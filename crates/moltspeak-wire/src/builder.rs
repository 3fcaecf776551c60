//! Fluent message construction.

use crate::validate::{ValidationOptions, Validator};
use moltspeak_types::protocol::now_ms;
use moltspeak_types::{
    AgentRef, Classification, ErrorCode, Message, MoltSpeakError, MoltSpeakResult, Operation,
    PiiMeta, Suggestion, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Accumulates message fields. Nothing is checked until [`build`].
///
/// `id`, `ts` and `v` are filled in when the builder is created and can be
/// overridden. Classification defaults to `int` and the payload to `{}`.
///
/// [`build`]: MessageBuilder::build
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    version: String,
    id: String,
    timestamp: i64,
    operation: Operation,
    sender: Option<AgentRef>,
    recipient: Option<AgentRef>,
    payload: Value,
    classification: Classification,
    reply_to: Option<String>,
    expires: Option<i64>,
    capabilities: Option<Vec<String>>,
    pii_meta: Option<PiiMeta>,
    extensions: BTreeMap<String, Value>,
}

impl MessageBuilder {
    pub fn new(operation: Operation) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            operation,
            sender: None,
            recipient: None,
            payload: json!({}),
            classification: Classification::Internal,
            reply_to: None,
            expires: None,
            capabilities: None,
            pii_meta: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn sender(mut self, sender: AgentRef) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn recipient(mut self, recipient: AgentRef) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn classification(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    /// Classify as `pii` and attach the consent metadata.
    pub fn pii(mut self, meta: PiiMeta) -> Self {
        self.classification = Classification::Pii;
        self.pii_meta = Some(meta);
        self
    }

    pub fn reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    /// Absolute expiry, epoch ms.
    pub fn expires_at(mut self, epoch_ms: i64) -> Self {
        self.expires = Some(epoch_ms);
        self
    }

    /// Expire `ms` milliseconds after the message timestamp.
    pub fn expires_in(mut self, ms: i64) -> Self {
        self.expires = Some(self.timestamp.saturating_add(ms));
        self
    }

    pub fn require_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    /// Add one extension payload under `namespace`.
    pub fn extension(mut self, namespace: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(namespace.into(), value);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Override the creation time. Call before [`expires_in`](Self::expires_in).
    pub fn timestamp(mut self, epoch_ms: i64) -> Self {
        self.timestamp = epoch_ms;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Assemble the message. Fails if sender or recipient is missing.
    pub fn build(self) -> MoltSpeakResult<Message> {
        let sender = self
            .sender
            .ok_or_else(|| MoltSpeakError::missing("from", "Sender is required"))?;
        let recipient = self
            .recipient
            .ok_or_else(|| MoltSpeakError::missing("to", "Recipient is required"))?;
        Ok(Message {
            version: self.version,
            id: self.id,
            timestamp: self.timestamp,
            operation: self.operation,
            sender: Some(sender),
            recipient: Some(recipient),
            payload: self.payload,
            classification: Some(self.classification),
            signature: None,
            reply_to: self.reply_to,
            expires: self.expires,
            capabilities: self.capabilities,
            pii_meta: self.pii_meta,
            extensions: (!self.extensions.is_empty()).then_some(self.extensions),
        })
    }

    /// Assemble and validate with default limits.
    pub fn build_validated(self) -> MoltSpeakResult<Message> {
        self.build_validated_with(&Validator::default())
    }

    /// Assemble and validate (non-strict, PII scan on). An invalid result
    /// becomes a hard error: [`MoltSpeakError::Consent`] for undeclared or
    /// unconsented personal data, [`MoltSpeakError::Schema`] otherwise.
    pub fn build_validated_with(self, validator: &Validator) -> MoltSpeakResult<Message> {
        let message = self.build()?;
        let result = validator.validate_message(&message, ValidationOptions::lenient());
        if result.valid {
            return Ok(message);
        }
        debug!(
            op = %message.operation,
            errors = result.errors.len(),
            "Built message failed validation"
        );
        match (result.code, result.suggestion) {
            (Some(ErrorCode::Consent), Some(Suggestion::RequestConsent { data_types })) => {
                Err(MoltSpeakError::Consent {
                    pii_types: data_types,
                })
            }
            _ => Err(MoltSpeakError::Schema {
                message: format!("Message validation failed: {}", result.errors.join("; ")),
                field: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AgentRef {
        AgentRef::new("alice", "acme")
    }

    fn bob() -> AgentRef {
        AgentRef::new("bob", "acme")
    }

    #[test]
    fn test_defaults() {
        let before = now_ms();
        let msg = MessageBuilder::new(Operation::Query)
            .sender(alice())
            .recipient(bob())
            .build()
            .unwrap();
        assert_eq!(msg.version, "0.1");
        assert!(Uuid::parse_str(&msg.id).is_ok());
        assert!(msg.timestamp >= before);
        assert_eq!(msg.classification, Some(Classification::Internal));
        assert_eq!(msg.payload, json!({}));
        assert!(msg.extensions.is_none());
        assert!(msg.signature.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = MessageBuilder::new(Operation::Hello);
        let b = MessageBuilder::new(Operation::Hello);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_missing_sender() {
        let err = MessageBuilder::new(Operation::Query)
            .recipient(bob())
            .build()
            .unwrap_err();
        match err {
            MoltSpeakError::Schema { message, field } => {
                assert_eq!(message, "Sender is required");
                assert_eq!(field.as_deref(), Some("from"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_recipient() {
        let err = MessageBuilder::new(Operation::Query)
            .sender(alice())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Recipient is required"));
        assert!(err.recoverable());
    }

    #[test]
    fn test_overrides_and_extras() {
        let msg = MessageBuilder::new(Operation::Task)
            .sender(alice())
            .recipient(bob())
            .id("fixed-id")
            .timestamp(1_000)
            .version("0.2")
            .expires_in(500)
            .reply_to("prev")
            .require_capabilities(["tasks.create"])
            .extension("acme.trace", json!({"span": "abc"}))
            .classification(Classification::Confidential)
            .build()
            .unwrap();
        assert_eq!(msg.id, "fixed-id");
        assert_eq!(msg.timestamp, 1_000);
        assert_eq!(msg.version, "0.2");
        assert_eq!(msg.expires, Some(1_500));
        assert_eq!(msg.reply_to.as_deref(), Some("prev"));
        assert_eq!(msg.capabilities, Some(vec!["tasks.create".to_string()]));
        assert_eq!(msg.extensions.unwrap()["acme.trace"]["span"], "abc");
        assert_eq!(msg.classification, Some(Classification::Confidential));
    }

    #[test]
    fn test_pii_sets_classification_and_meta() {
        let meta = PiiMeta::new(vec!["email".into()], "user-42", "support", "consent-token");
        let msg = MessageBuilder::new(Operation::Query)
            .sender(alice())
            .recipient(bob())
            .payload(json!({"contact": "user@example.com"}))
            .pii(meta.clone())
            .build_validated()
            .unwrap();
        assert_eq!(msg.classification, Some(Classification::Pii));
        assert_eq!(msg.pii_meta, Some(meta));
    }

    #[test]
    fn test_validated_build_rejects_undeclared_pii() {
        let err = MessageBuilder::new(Operation::Query)
            .sender(alice())
            .recipient(bob())
            .payload(json!({"contact": "user@example.com"}))
            .build_validated()
            .unwrap_err();
        match err {
            MoltSpeakError::Consent { pii_types } => assert_eq!(pii_types, vec!["email"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validated_build_rejects_stale() {
        let err = MessageBuilder::new(Operation::Query)
            .sender(alice())
            .recipient(bob())
            .timestamp(0)
            .build_validated()
            .unwrap_err();
        assert!(matches!(err, MoltSpeakError::Schema { .. }));
        assert!(err.to_string().contains("Possible replay attack"));
    }
}
