//! End-to-end tests for the send and receive pipeline.
//!
//! Outbound: build -> validate -> sign -> encode.
//! Inbound: decode -> validate -> verify -> reply.
//!
//! Everything runs in-process; no transport is involved.

use moltspeak_types::{
    AgentRef, Classification, ErrorCode, Message, MoltSpeakError, Operation, PiiMeta, Suggestion,
};
use moltspeak_wire::codec::{
    decode_inbound, decode_message, decode_with, encode, DecodeOptions, Decoder, EncodeOptions,
};
use moltspeak_wire::envelope::{seal, AesGcmCipher};
use moltspeak_wire::signing::{sign_offloaded, verify_offloaded};
use moltspeak_wire::{
    generate_keypair, ops, parse_config, policy, sign_message, validate_message, verify_message,
    Ed25519Scheme, MessageBuilder, SignatureScheme, ValidationOptions, Validator,
};
use serde_json::json;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn planner() -> AgentRef {
    AgentRef::new("planner", "acme")
}

fn inventory() -> AgentRef {
    AgentRef::new("inventory", "acme")
}

fn outsider() -> AgentRef {
    AgentRef::new("auditor", "widgets-inc")
}

fn envelope_opts() -> EncodeOptions {
    EncodeOptions {
        pretty: false,
        envelope: true,
        compressed: false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_signed_query_round_trip() {
    let (private_key, public_key) = generate_keypair();
    let scheme = Ed25519Scheme;

    let msg = ops::query(
        json!({"domain": "warehouse", "intent": "stock_level", "params": {"sku": "A-7"}}),
        planner().with_key(public_key.clone()),
        inventory(),
    )
    .unwrap();
    assert!(validate_message(&msg, ValidationOptions::default()).valid);

    let signed = sign_message(&msg, &scheme, &private_key).unwrap();
    assert!(msg.signature.is_none());
    assert!(signed.signature.as_deref().unwrap().starts_with("ed25519:"));

    let wire = encode(&signed, envelope_opts()).unwrap();

    // Receiver side.
    let inbound = decode_inbound(&wire).unwrap();
    assert_eq!(inbound.message, signed);
    assert!(validate_message(&inbound.message, ValidationOptions::default()).valid);
    let sender_key = inbound
        .message
        .sender
        .as_ref()
        .and_then(|s| s.key.clone())
        .unwrap();
    assert!(inbound.verify(&scheme, &sender_key).unwrap());
    assert!(verify_message(&inbound.message, &scheme, &sender_key).unwrap());

    let mut tampered = inbound.message.clone();
    tampered.payload["params"]["sku"] = json!("A-8");
    assert!(!verify_message(&tampered, &scheme, &sender_key).unwrap());
}

#[test]
fn test_receiver_with_configured_window() {
    let config = parse_config("[validation]\nreplay_window_ms = 3600000\n").unwrap();
    let decoder = Decoder::from_config(&config);

    let mut msg = ops::query(json!({"intent": "stock_level"}), planner(), inventory()).unwrap();
    msg.timestamp -= 20 * 60 * 1000;
    let wire = encode(&msg, envelope_opts()).unwrap();

    assert!(decode_message(&wire).is_err());
    let received = decoder.decode_message(&wire).unwrap();
    assert_eq!(received, msg);
    assert!(decoder
        .validator()
        .validate_message(&received, decoder.validator().options())
        .valid);
}

#[test]
fn test_pii_message_sealed_in_transit() {
    let meta = PiiMeta::new(
        vec!["email".into()],
        "user-42",
        "order_confirmation",
        "consent-7f3a",
    );
    let msg = MessageBuilder::new(Operation::Task)
        .sender(planner())
        .recipient(inventory())
        .payload(json!({"notify": "customer@example.com"}))
        .pii(meta)
        .expires_in(60_000)
        .build_validated()
        .unwrap();
    assert!(policy::must_encrypt(&Classification::Pii));

    let cipher = AesGcmCipher::generate();
    let wire = seal(&msg, &cipher).unwrap().to_value().unwrap().to_string();
    assert!(!wire.contains("customer@example.com"));

    let err = decode_message(&wire).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Capability);

    let received = decode_with(&wire, DecodeOptions::default(), Some(&cipher))
        .unwrap()
        .into_message()
        .unwrap();
    assert_eq!(received, msg);
    assert!(validate_message(&received, ValidationOptions::default()).valid);
}

#[test]
fn test_undeclared_pii_rejected_then_resent_with_consent() {
    let offending = ops::query(
        json!({"lookup": "jane.doe@example.com"}),
        planner(),
        inventory(),
    )
    .unwrap();
    let wire = encode(&offending, EncodeOptions::default()).unwrap();

    // Decoding only checks structure; the PII scan happens on validation.
    let inbound = decode_message(&wire).unwrap();
    let result = validate_message(&inbound, ValidationOptions::default());
    assert!(!result.valid);
    assert_eq!(result.code, Some(ErrorCode::Consent));

    let reply = ops::reject(&inbound, &result, inventory()).unwrap();
    let reply = decode_message(&encode(&reply, envelope_opts()).unwrap()).unwrap();
    assert_eq!(reply.operation, Operation::Error);
    assert_eq!(reply.reply_to.as_deref(), Some(offending.id.as_str()));

    let suggestion: Suggestion = serde_json::from_value(reply.payload["suggestion"].clone()).unwrap();
    let Suggestion::RequestConsent { data_types } = suggestion else {
        panic!("expected a consent suggestion");
    };
    assert_eq!(data_types, vec!["email".to_string()]);

    let resent = MessageBuilder::new(Operation::Query)
        .sender(planner())
        .recipient(inventory())
        .payload(offending.payload.clone())
        .reply_to(reply.id.clone())
        .pii(PiiMeta::new(data_types, "jane", "account_lookup", "consent-91"))
        .build()
        .unwrap();
    assert!(validate_message(&resent, ValidationOptions::default()).valid);
}

#[test]
fn test_secret_stays_inside_org() {
    let internal = MessageBuilder::new(Operation::Query)
        .sender(planner())
        .recipient(inventory())
        .classification(Classification::Secret)
        .build()
        .unwrap();
    assert!(validate_message(&internal, ValidationOptions::default()).valid);

    let leaked: Message = MessageBuilder::new(Operation::Query)
        .sender(planner())
        .recipient(outsider())
        .classification(Classification::Secret)
        .build()
        .unwrap();
    let result = validate_message(&leaked, ValidationOptions::default());
    assert!(!result.valid);
    assert_eq!(result.code, Some(ErrorCode::Classification));

    let reply = ops::reject(&leaked, &result, outsider()).unwrap();
    assert_eq!(reply.payload["code"], "E_CLASSIFICATION");
    assert_eq!(reply.payload["category"], "privacy");
}

#[test]
fn test_configured_size_limit() {
    let config = parse_config("[validation]\nmax_message_bytes = 512\n").unwrap();
    let validator = Validator::new(config.validation);

    let msg = ops::query(json!({"notes": "x".repeat(600)}), planner(), inventory()).unwrap();
    let result = validator.validate_message(&msg, validator.options());
    assert!(!result.valid);
    assert_eq!(
        result.suggestion,
        Some(Suggestion::ReduceSize { max_bytes: 512 })
    );

    let err = MessageBuilder::new(Operation::Query)
        .sender(planner())
        .recipient(inventory())
        .payload(json!({"notes": "x".repeat(600)}))
        .build_validated_with(&validator)
        .unwrap_err();
    assert!(matches!(err, MoltSpeakError::Schema { .. }));
    assert!(err.to_string().contains("exceeds size limit"));
}

#[tokio::test]
async fn test_offloaded_signing() {
    let (private_key, public_key) = generate_keypair();
    let scheme: Arc<dyn SignatureScheme> = Arc::new(Ed25519Scheme);
    let msg = ops::hello(planner(), inventory(), &["query", "task"]).unwrap();

    let signed = sign_offloaded(msg, scheme.clone(), private_key).await.unwrap();
    assert!(signed.is_signed());
    assert!(verify_offloaded(signed.clone(), scheme.clone(), public_key)
        .await
        .unwrap());

    let (_, other_public) = generate_keypair();
    assert!(!verify_offloaded(signed, scheme, other_public).await.unwrap());
}
