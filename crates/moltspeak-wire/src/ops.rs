//! Constructors for the standard operations.
//!
//! Every factory goes through [`MessageBuilder`] and classifies the result
//! `int` unless stated otherwise.

use crate::builder::MessageBuilder;
use moltspeak_types::{
    AgentRef, Classification, ErrorCode, Message, MoltSpeakError, MoltSpeakResult, Operation,
    SizeLimits, Suggestion, ValidationResult, PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_HELLO_CAPABILITIES: &[&str] = &["query", "respond"];

/// Definition of a delegated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Generated as `task-<8 hex>` when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default = "default_task_type")]
    pub kind: String,
    pub description: String,
    #[serde(default = "empty_object")]
    pub constraints: Value,
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Epoch ms.
    ///
    /// A current epoch-ms value is a 13-digit run, which the payload PII
    /// scan reports as a phone number. Validate task messages carrying a
    /// deadline with `check_pii` off, or classify them `pii`.
    #[serde(default)]
    pub deadline: Option<i64>,
    /// Where to deliver the result.
    #[serde(default)]
    pub callback: Option<Value>,
}

fn default_task_type() -> String {
    "general".to_string()
}

fn default_priority() -> String {
    "normal".to_string()
}

fn empty_object() -> Value {
    json!({})
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: default_task_type(),
            description: description.into(),
            constraints: empty_object(),
            priority: default_priority(),
            deadline: None,
            callback: None,
        }
    }
}

/// Body of an `error` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub field: Option<String>,
    pub recoverable: bool,
    pub suggestion: Option<Suggestion>,
}

impl ErrorDetails {
    /// Recoverable by default.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            recoverable: true,
            suggestion: None,
        }
    }

    /// Report a hard failure to a peer.
    pub fn from_error(err: &MoltSpeakError) -> Self {
        let field = match err {
            MoltSpeakError::Schema { field, .. } => field.clone(),
            _ => None,
        };
        let suggestion = match err {
            MoltSpeakError::Consent { pii_types } => Some(Suggestion::RequestConsent {
                data_types: pii_types.clone(),
            }),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            field,
            recoverable: err.recoverable(),
            suggestion,
        }
    }

    fn to_payload(&self) -> Value {
        json!({
            "code": self.code,
            "category": self.code.category(),
            "message": self.message,
            "field": self.field,
            "recoverable": self.recoverable,
            "suggestion": self.suggestion,
        })
    }
}

/// Handshake announcing protocol versions and supported operations.
/// An empty `capabilities` slice advertises `query` and `respond`.
pub fn hello(from: AgentRef, to: AgentRef, capabilities: &[&str]) -> MoltSpeakResult<Message> {
    let capabilities = if capabilities.is_empty() {
        DEFAULT_HELLO_CAPABILITIES
    } else {
        capabilities
    };
    let supported: Vec<String> = Classification::KNOWN
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    MessageBuilder::new(Operation::Hello)
        .sender(from)
        .recipient(to)
        .payload(json!({
            "protocol_versions": [PROTOCOL_VERSION],
            "capabilities": capabilities,
            "extensions": [],
            "max_message_size": SizeLimits::SINGLE_MESSAGE,
            "supported_cls": supported,
        }))
        .build()
}

pub fn query(query: Value, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Query)
        .sender(from)
        .recipient(to)
        .payload(query)
        .build()
}

/// Successful reply to `reply_to_id`.
pub fn respond(
    reply_to_id: &str,
    data: Value,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Respond)
        .sender(from)
        .recipient(to)
        .reply_to(reply_to_id)
        .payload(json!({"status": "success", "data": data}))
        .build()
}

pub fn task(spec: TaskSpec, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    let task_id = spec
        .id
        .unwrap_or_else(|| format!("task-{}", &Uuid::new_v4().simple().to_string()[..8]));
    let mut payload = json!({
        "action": "create",
        "task_id": task_id,
        "type": spec.kind,
        "description": spec.description,
        "constraints": spec.constraints,
        "priority": spec.priority,
    });
    if let Some(deadline) = spec.deadline {
        payload["deadline"] = json!(deadline);
    }
    if let Some(callback) = spec.callback {
        payload["callback"] = callback;
    }
    MessageBuilder::new(Operation::Task)
        .sender(from)
        .recipient(to)
        .payload(payload)
        .build()
}

pub fn error(
    reply_to_id: &str,
    details: &ErrorDetails,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Error)
        .sender(from)
        .recipient(to)
        .reply_to(reply_to_id)
        .payload(details.to_payload())
        .build()
}

/// Ask the peer to obtain consent for `data_types`.
pub fn consent_request(
    reply_to_id: &str,
    data_types: Vec<String>,
    purpose: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Consent)
        .sender(from)
        .recipient(to)
        .reply_to(reply_to_id)
        .payload(json!({
            "action": "request",
            "data_types": data_types,
            "purpose": purpose,
        }))
        .build()
}

/// Grant consent for `data_types`, usually in answer to a consent request.
pub fn consent_grant(
    data_types: Vec<String>,
    purpose: &str,
    consent_token: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    consent_message("grant", data_types, purpose, consent_token, from, to)
}

/// Withdraw a previously granted consent token.
pub fn consent_revoke(
    consent_token: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    consent_message("revoke", Vec::new(), "", consent_token, from, to)
}

fn consent_message(
    action: &str,
    data_types: Vec<String>,
    purpose: &str,
    consent_token: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Consent)
        .sender(from)
        .recipient(to)
        .payload(json!({
            "action": action,
            "data_types": data_types,
            "purpose": purpose,
            "duration": "session",
            "consent_token": consent_token,
        }))
        .build()
}

/// Ask for the current state of a delegated task.
pub fn task_status(task_id: &str, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    task_action("status", task_id, from, to)
}

pub fn task_cancel(task_id: &str, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    task_action("cancel", task_id, from, to)
}

fn task_action(
    action: &str,
    task_id: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Task)
        .sender(from)
        .recipient(to)
        .payload(json!({"action": action, "task_id": task_id}))
        .build()
}

/// Open a stream. `kind` names the content, e.g. `text`.
pub fn stream_start(
    stream_id: &str,
    kind: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Stream)
        .sender(from)
        .recipient(to)
        .payload(json!({"action": "start", "stream_id": stream_id, "type": kind}))
        .build()
}

/// One chunk of a stream.
///
/// The serialized `data` may not exceed [`SizeLimits::STREAM_CHUNK`].
/// `progress` is a fraction in `0.0..=1.0` when the total is known.
pub fn stream_chunk(
    stream_id: &str,
    seq: u64,
    data: Value,
    progress: Option<f64>,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    let size = serde_json::to_string(&data)?.len();
    if size > SizeLimits::STREAM_CHUNK {
        return Err(MoltSpeakError::InvalidParam(format!(
            "Stream chunk exceeds size limit: {size} bytes > {} bytes",
            SizeLimits::STREAM_CHUNK
        )));
    }
    let mut payload = json!({
        "action": "chunk",
        "stream_id": stream_id,
        "seq": seq,
        "data": data,
    });
    if let Some(progress) = progress {
        payload["progress"] = json!(progress);
    }
    MessageBuilder::new(Operation::Stream)
        .sender(from)
        .recipient(to)
        .payload(payload)
        .build()
}

pub fn stream_end(
    stream_id: &str,
    total_chunks: u64,
    checksum: Option<&str>,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    let mut payload = json!({
        "action": "end",
        "stream_id": stream_id,
        "total_chunks": total_chunks,
    });
    if let Some(checksum) = checksum {
        payload["checksum"] = json!(checksum);
    }
    MessageBuilder::new(Operation::Stream)
        .sender(from)
        .recipient(to)
        .payload(payload)
        .build()
}

/// Invoke a tool the recipient exposes.
pub fn tool_invoke(
    tool: &str,
    input: Value,
    timeout_ms: Option<u64>,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    let mut payload = json!({"action": "invoke", "tool": tool, "input": input});
    if let Some(timeout_ms) = timeout_ms {
        payload["timeout_ms"] = json!(timeout_ms);
    }
    MessageBuilder::new(Operation::Tool)
        .sender(from)
        .recipient(to)
        .payload(payload)
        .build()
}

pub fn tool_list(from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Tool)
        .sender(from)
        .recipient(to)
        .payload(json!({"action": "list"}))
        .build()
}

pub fn tool_describe(tool: &str, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Tool)
        .sender(from)
        .recipient(to)
        .payload(json!({"action": "describe", "tool": tool}))
        .build()
}

/// Ask the peer to prove it holds the key it advertised by signing
/// `challenge`.
pub fn verify_challenge(challenge: &str, from: AgentRef, to: AgentRef) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Verify)
        .sender(from)
        .recipient(to)
        .payload(json!({"challenge": challenge}))
        .build()
}

/// Answer a verify challenge with the signature over it.
pub fn verify_response(
    reply_to_id: &str,
    challenge: &str,
    signature: &str,
    from: AgentRef,
    to: AgentRef,
) -> MoltSpeakResult<Message> {
    MessageBuilder::new(Operation::Verify)
        .sender(from)
        .recipient(to)
        .reply_to(reply_to_id)
        .payload(json!({"challenge": challenge, "signature": signature}))
        .build()
}

/// Answer an inbound message that failed validation.
///
/// The reply goes back to the inbound sender and carries the result's
/// first error code, every error joined into one message, and the
/// corrective suggestion if there is one.
pub fn reject(
    inbound: &Message,
    result: &ValidationResult,
    responder: AgentRef,
) -> MoltSpeakResult<Message> {
    let to = inbound
        .sender
        .clone()
        .ok_or_else(|| MoltSpeakError::missing("from", "Inbound message has no sender"))?;
    let code = result.code.unwrap_or(ErrorCode::Schema);
    let details = ErrorDetails {
        code,
        message: result.error_summary(),
        field: None,
        recoverable: result.suggestion.is_some()
            || matches!(
                code,
                ErrorCode::Schema | ErrorCode::MissingField | ErrorCode::InvalidParam
            ),
        suggestion: result.suggestion.clone(),
    };
    debug!(code = %code, errors = result.errors.len(), "Rejecting inbound message");
    error(&inbound.id, &details, responder, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{validate_message, ValidationOptions};

    fn alice() -> AgentRef {
        AgentRef::new("alice", "acme")
    }

    fn bob() -> AgentRef {
        AgentRef::new("bob", "acme")
    }

    #[test]
    fn test_hello_payload() {
        let msg = hello(alice(), bob(), &[]).unwrap();
        assert_eq!(msg.operation, Operation::Hello);
        assert_eq!(msg.classification, Some(Classification::Internal));
        assert_eq!(msg.payload["protocol_versions"], json!(["0.1"]));
        assert_eq!(msg.payload["capabilities"], json!(["query", "respond"]));
        assert_eq!(msg.payload["max_message_size"], 1_048_576);
        assert_eq!(
            msg.payload["supported_cls"],
            json!(["pub", "int", "conf", "pii", "sec"])
        );
        assert!(validate_message(&msg, ValidationOptions::default()).valid);

        let custom = hello(alice(), bob(), &["task"]).unwrap();
        assert_eq!(custom.payload["capabilities"], json!(["task"]));
    }

    #[test]
    fn test_query_and_respond() {
        let q = query(json!({"domain": "weather", "intent": "forecast"}), alice(), bob()).unwrap();
        assert_eq!(q.payload["intent"], "forecast");

        let r = respond(&q.id, json!({"temp": 21}), bob(), alice()).unwrap();
        assert_eq!(r.operation, Operation::Respond);
        assert_eq!(r.reply_to.as_deref(), Some(q.id.as_str()));
        assert_eq!(r.payload, json!({"status": "success", "data": {"temp": 21}}));
    }

    #[test]
    fn test_task_defaults() {
        let msg = task(TaskSpec::new("summarize the report"), alice(), bob()).unwrap();
        let p = &msg.payload;
        assert_eq!(p["action"], "create");
        assert_eq!(p["type"], "general");
        assert_eq!(p["priority"], "normal");
        assert_eq!(p["constraints"], json!({}));
        let task_id = p["task_id"].as_str().unwrap();
        assert!(task_id.starts_with("task-"));
        assert_eq!(task_id.len(), 13);
        assert!(p.get("deadline").is_none());
        assert!(p.get("callback").is_none());
    }

    #[test]
    fn test_task_from_json_spec() {
        let spec: TaskSpec = serde_json::from_value(json!({
            "id": "task-fixed",
            "type": "research",
            "description": "collect sources",
            "deadline": 42,
            "callback": {"op": "respond"}
        }))
        .unwrap();
        let msg = task(spec, alice(), bob()).unwrap();
        assert_eq!(msg.payload["task_id"], "task-fixed");
        assert_eq!(msg.payload["type"], "research");
        assert_eq!(msg.payload["priority"], "normal");
        assert_eq!(msg.payload["constraints"], json!({}));
        assert_eq!(msg.payload["deadline"], 42);
        assert_eq!(msg.payload["callback"]["op"], "respond");
    }

    #[test]
    fn test_error_payload() {
        let details = ErrorDetails::new(ErrorCode::RateLimit, "slow down");
        let msg = error("m-1", &details, bob(), alice()).unwrap();
        assert_eq!(msg.reply_to.as_deref(), Some("m-1"));
        assert_eq!(msg.payload["code"], "E_RATE_LIMIT");
        assert_eq!(msg.payload["category"], "transport");
        assert_eq!(msg.payload["message"], "slow down");
        assert_eq!(msg.payload["recoverable"], true);
        assert!(msg.payload["field"].is_null());
    }

    #[test]
    fn test_error_details_from_hard_failure() {
        let err = MoltSpeakError::Capability("decryption (aes-256-gcm)".to_string());
        let details = ErrorDetails::from_error(&err);
        assert_eq!(details.code, ErrorCode::Capability);
        assert!(!details.recoverable);

        let err = MoltSpeakError::missing("to", "Recipient is required");
        let details = ErrorDetails::from_error(&err);
        assert_eq!(details.field.as_deref(), Some("to"));
        assert!(details.recoverable);
    }

    #[test]
    fn test_consent_request() {
        let msg = consent_request("m-9", vec!["email".into()], "support", bob(), alice()).unwrap();
        assert_eq!(msg.operation, Operation::Consent);
        assert_eq!(
            msg.payload,
            json!({"action": "request", "data_types": ["email"], "purpose": "support"})
        );
    }

    #[test]
    fn test_reject_undeclared_pii() {
        let inbound = query(json!({"email": "user@example.com"}), alice(), bob()).unwrap();
        let result = validate_message(&inbound, ValidationOptions::default());
        assert!(!result.valid);

        let reply = reject(&inbound, &result, bob()).unwrap();
        assert_eq!(reply.operation, Operation::Error);
        assert_eq!(reply.reply_to.as_deref(), Some(inbound.id.as_str()));
        assert_eq!(reply.recipient.as_ref().unwrap().agent, "alice");
        assert_eq!(reply.payload["code"], "E_CONSENT");
        assert_eq!(reply.payload["category"], "privacy");
        assert_eq!(reply.payload["recoverable"], true);
        assert_eq!(
            reply.payload["suggestion"],
            json!({"action": "request_consent", "data_types": ["email"]})
        );
        assert!(reply.payload["message"]
            .as_str()
            .unwrap()
            .contains("PII detected without consent: email"));
    }

    #[test]
    fn test_reject_requires_sender() {
        let mut inbound = query(json!({}), alice(), bob()).unwrap();
        inbound.sender = None;
        let err = reject(&inbound, &ValidationResult::new(), bob()).unwrap_err();
        assert!(err.to_string().contains("Inbound message has no sender"));
    }

    #[test]
    fn test_reject_recoverable_by_category() {
        let inbound = query(json!({}), alice(), bob()).unwrap();

        let mut result = ValidationResult::new();
        result.error(ErrorCode::MissingField, "Missing required field: ts");
        let reply = reject(&inbound, &result, bob()).unwrap();
        assert_eq!(reply.payload["recoverable"], true);

        let mut result = ValidationResult::new();
        result.error(ErrorCode::Classification, "Secret messages cannot leave the org");
        let reply = reject(&inbound, &result, bob()).unwrap();
        assert_eq!(reply.payload["category"], "privacy");
        assert_eq!(reply.payload["recoverable"], false);
    }

    #[test]
    fn test_task_deadline_reads_as_phone() {
        let mut spec = TaskSpec::new("ship the release");
        spec.deadline = Some(1_700_000_000_000);
        let msg = task(spec, alice(), bob()).unwrap();

        let result = validate_message(&msg, ValidationOptions::default());
        assert!(!result.valid);
        assert_eq!(result.code, Some(ErrorCode::Consent));
        assert!(result.errors[0].contains("phone"));

        let opts = ValidationOptions {
            check_pii: false,
            ..Default::default()
        };
        assert!(validate_message(&msg, opts).valid);
    }

    #[test]
    fn test_task_status_and_cancel() {
        let status = task_status("task-1a2b3c4d", alice(), bob()).unwrap();
        assert_eq!(status.operation, Operation::Task);
        assert_eq!(
            status.payload,
            json!({"action": "status", "task_id": "task-1a2b3c4d"})
        );

        let cancel = task_cancel("task-1a2b3c4d", alice(), bob()).unwrap();
        assert_eq!(cancel.payload["action"], "cancel");
        assert!(validate_message(&cancel, ValidationOptions::default()).valid);
    }

    #[test]
    fn test_stream_lifecycle() {
        let start = stream_start("s-1", "text", alice(), bob()).unwrap();
        assert_eq!(start.operation, Operation::Stream);
        assert_eq!(
            start.payload,
            json!({"action": "start", "stream_id": "s-1", "type": "text"})
        );

        let chunk = stream_chunk("s-1", 0, json!("first part"), Some(0.5), alice(), bob()).unwrap();
        assert_eq!(chunk.payload["seq"], 0);
        assert_eq!(chunk.payload["data"], "first part");
        assert_eq!(chunk.payload["progress"], 0.5);

        let bare = stream_chunk("s-1", 1, json!("rest"), None, alice(), bob()).unwrap();
        assert!(bare.payload.get("progress").is_none());

        let end = stream_end("s-1", 2, Some("sha256:ab12"), alice(), bob()).unwrap();
        assert_eq!(end.payload["total_chunks"], 2);
        assert_eq!(end.payload["checksum"], "sha256:ab12");
        let end = stream_end("s-1", 2, None, alice(), bob()).unwrap();
        assert!(end.payload.get("checksum").is_none());

        for msg in [&start, &chunk, &end] {
            assert!(validate_message(msg, ValidationOptions::default()).valid);
        }
    }

    #[test]
    fn test_stream_chunk_size_limit() {
        // The JSON string adds two quote bytes.
        let fits = "x".repeat(SizeLimits::STREAM_CHUNK - 2);
        assert!(stream_chunk("s-1", 0, json!(fits), None, alice(), bob()).is_ok());

        let too_big = "x".repeat(SizeLimits::STREAM_CHUNK);
        let err = stream_chunk("s-1", 0, json!(too_big), None, alice(), bob()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParam);
        assert!(err.recoverable());
        assert!(err.to_string().contains("Stream chunk exceeds size limit"));
    }

    #[test]
    fn test_tool_operations() {
        let invoke =
            tool_invoke("search", json!({"q": "rust"}), Some(5_000), alice(), bob()).unwrap();
        assert_eq!(invoke.operation, Operation::Tool);
        assert_eq!(
            invoke.payload,
            json!({
                "action": "invoke",
                "tool": "search",
                "input": {"q": "rust"},
                "timeout_ms": 5000
            })
        );

        let untimed = tool_invoke("search", json!({}), None, alice(), bob()).unwrap();
        assert!(untimed.payload.get("timeout_ms").is_none());

        let list = tool_list(alice(), bob()).unwrap();
        assert_eq!(list.payload, json!({"action": "list"}));

        let describe = tool_describe("search", alice(), bob()).unwrap();
        assert_eq!(describe.payload, json!({"action": "describe", "tool": "search"}));
    }

    #[test]
    fn test_consent_grant_and_revoke() {
        let grant = consent_grant(
            vec!["email".into()],
            "support",
            "consent-7f3a",
            alice(),
            bob(),
        )
        .unwrap();
        assert_eq!(grant.operation, Operation::Consent);
        assert_eq!(
            grant.payload,
            json!({
                "action": "grant",
                "data_types": ["email"],
                "purpose": "support",
                "duration": "session",
                "consent_token": "consent-7f3a"
            })
        );

        let revoke = consent_revoke("consent-7f3a", alice(), bob()).unwrap();
        assert_eq!(revoke.payload["action"], "revoke");
        assert_eq!(revoke.payload["data_types"], json!([]));
        assert_eq!(revoke.payload["purpose"], "");
        assert_eq!(revoke.payload["consent_token"], "consent-7f3a");
    }

    #[test]
    fn test_verify_challenge_and_response() {
        use crate::signing::{generate_keypair, Ed25519Scheme, SignatureScheme};
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let (private_key, public_key) = generate_keypair();
        let challenge = verify_challenge("nonce-a1b2", alice(), bob()).unwrap();
        assert_eq!(challenge.operation, Operation::Verify);
        assert_eq!(challenge.payload, json!({"challenge": "nonce-a1b2"}));

        let signature = STANDARD.encode(Ed25519Scheme.sign(b"nonce-a1b2", &private_key).unwrap());
        let response =
            verify_response(&challenge.id, "nonce-a1b2", &signature, bob(), alice()).unwrap();
        assert_eq!(response.reply_to.as_deref(), Some(challenge.id.as_str()));
        assert_eq!(response.payload["challenge"], "nonce-a1b2");
        let returned = STANDARD
            .decode(response.payload["signature"].as_str().unwrap())
            .unwrap();
        assert!(Ed25519Scheme.verify(b"nonce-a1b2", &returned, &public_key));
    }
}
