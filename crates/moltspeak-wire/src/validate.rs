//! Message validation engine.
//!
//! Validation runs over the untyped wire structure so that hostile or
//! malformed input can be inspected without first trusting it to
//! deserialize. Typed [`Message`]s are converted and go through the same
//! path. Every check appends to the [`ValidationResult`]; nothing short
//! circuits except a non-object input.

use crate::pii;
use crate::policy::{self, PolicySubject, PolicyViolation};
use crate::signing;
use moltspeak_types::config::ValidationConfig;
use moltspeak_types::protocol::now_ms;
use moltspeak_types::{
    Classification, ErrorCode, Message, Operation, Suggestion, ValidationResult, PROTOCOL_VERSION,
};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

const BASE_REQUIRED: [&str; 4] = ["v", "id", "ts", "op"];
const STRICT_REQUIRED: [&str; 2] = ["from", "cls"];

fn uuid_pattern() -> &'static Regex {
    static UUID: OnceLock<Regex> = OnceLock::new();
    UUID.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("UUID regex is valid")
    })
}

/// Per-call validation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Also require `from` and `cls`.
    pub strict: bool,
    /// Scan the payload for PII unless the message is classified `pii`.
    pub check_pii: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strict: true,
            check_pii: true,
        }
    }
}

impl ValidationOptions {
    /// Non-strict, PII scan on. Used by the builder.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            check_pii: true,
        }
    }

    /// Non-strict, no PII scan. Used when decoding inbound text.
    pub fn structural() -> Self {
        Self {
            strict: false,
            check_pii: false,
        }
    }
}

impl From<&ValidationConfig> for ValidationOptions {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            strict: config.strict,
            check_pii: config.check_pii,
        }
    }
}

/// Validates messages against a fixed set of limits.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// The configured default flags.
    pub fn options(&self) -> ValidationOptions {
        ValidationOptions::from(&self.config)
    }

    pub fn validate_message(&self, message: &Message, opts: ValidationOptions) -> ValidationResult {
        self.validate_message_at(message, opts, now_ms())
    }

    pub fn validate_message_at(
        &self,
        message: &Message,
        opts: ValidationOptions,
        now: i64,
    ) -> ValidationResult {
        match message.to_value() {
            Ok(value) => self.validate_value_at(&value, opts, now),
            Err(e) => {
                let mut result = ValidationResult::new();
                result.error(
                    ErrorCode::Internal,
                    format!("Message could not be serialized: {e}"),
                );
                result
            }
        }
    }

    pub fn validate_value(&self, value: &Value, opts: ValidationOptions) -> ValidationResult {
        self.validate_value_at(value, opts, now_ms())
    }

    /// Validate against an explicit clock reading, in epoch ms.
    pub fn validate_value_at(
        &self,
        value: &Value,
        opts: ValidationOptions,
        now: i64,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        let Some(obj) = value.as_object() else {
            result.error(ErrorCode::Schema, "Message must be a JSON object");
            return result;
        };
        let extra: &[&str] = if opts.strict { &STRICT_REQUIRED } else { &[] };
        for &name in BASE_REQUIRED.iter().chain(extra) {
            if present(obj, name).is_none() {
                result.error(
                    ErrorCode::MissingField,
                    format!("Missing required field: {name}"),
                );
            }
        }

        if let Some(v) = present(obj, "v") {
            if v.as_str() != Some(PROTOCOL_VERSION) {
                result.warn(format!(
                    "Protocol version mismatch: expected {PROTOCOL_VERSION}, got {}",
                    display(v)
                ));
            }
        }

        if let Some(op) = present(obj, "op") {
            let known = op.as_str().map(Operation::from).is_some_and(|o| o.is_known());
            if !known {
                result.warn(format!("Unknown operation: {}", display(op)));
            }
        }

        if let Some(cls) = present(obj, "cls") {
            let known = cls
                .as_str()
                .map(Classification::from)
                .is_some_and(|c| c.is_known());
            if !known {
                let allowed = Classification::KNOWN
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                result.error(
                    ErrorCode::Classification,
                    format!("Invalid classification: {}. Must be one of: {allowed}", display(cls)),
                );
            }
        }

        if let Some(ts) = present(obj, "ts") {
            match ts.as_f64() {
                None => result.error(ErrorCode::Schema, "Timestamp (ts) must be a number"),
                Some(t) if t < 0.0 => {
                    result.error(ErrorCode::Schema, "Timestamp (ts) must be non-negative")
                }
                Some(t) => {
                    let age_ms = now as f64 - t;
                    let window_ms = self.config.replay_window_ms as f64;
                    if age_ms > window_ms {
                        result.error(
                            ErrorCode::Schema,
                            format!(
                                "Message timestamp too old: {:.1}s ago (max allowed: {:.1}s). Possible replay attack.",
                                age_ms / 1000.0,
                                window_ms / 1000.0
                            ),
                        );
                    }
                }
            }
        }

        if let Some(id) = present(obj, "id") {
            match id.as_str() {
                Some(s) if !uuid_pattern().is_match(s) => {
                    result.warn("Message ID should be a valid UUID format")
                }
                Some(_) => {}
                None => result.error(ErrorCode::Schema, "Message ID (id) must be a string"),
            }
        }

        for party in ["from", "to"] {
            match present(obj, party) {
                Some(Value::Object(agent)) if !agent.contains_key("agent") => {
                    result.warn(format!("{party}.agent is recommended"))
                }
                Some(Value::Object(_)) | None => {}
                Some(_) => result.error(ErrorCode::Schema, format!("{party} must be an object")),
            }
        }

        let size = value.to_string().len();
        if size > self.config.max_message_bytes {
            result.error(
                ErrorCode::Schema,
                format!(
                    "Message exceeds size limit: {size} bytes > {} bytes",
                    self.config.max_message_bytes
                ),
            );
            result.suggest(Suggestion::ReduceSize {
                max_bytes: self.config.max_message_bytes,
            });
        }

        let subject = PolicySubject::from_value(value);
        if let Some(subject) = &subject {
            for violation in policy::evaluate(subject) {
                if matches!(
                    violation,
                    PolicyViolation::MissingPiiMeta | PolicyViolation::MissingConsentProof
                ) {
                    let data_types = declared_pii_types(value);
                    result.suggest(Suggestion::RequestConsent { data_types });
                }
                result.error(violation.code(), violation.to_string());
            }
        }

        let declared_pii = subject
            .as_ref()
            .is_some_and(|s| s.classification == Classification::Pii);
        if opts.check_pii && !declared_pii {
            let report = pii::detect_in(present(obj, "p").unwrap_or(&Value::Null));
            if report.has_pii {
                let names = report.type_names();
                result.error(
                    ErrorCode::Consent,
                    format!(
                        "PII detected without consent: {}. Set cls to 'pii' with consent metadata.",
                        names.join(", ")
                    ),
                );
                result.suggest(Suggestion::RequestConsent { data_types: names });
            }
        }

        if let Some(exp) = present(obj, "exp") {
            match exp.as_f64() {
                None => result.error(ErrorCode::Schema, "Expiry (exp) must be a number"),
                Some(e) if e < now as f64 => result.warn("Message has expired"),
                Some(_) => {}
            }
        }

        if !result.valid {
            log_rejection(value, subject.as_ref(), &result);
        }
        result
    }
}

/// Validate a typed message with default limits.
pub fn validate_message(message: &Message, opts: ValidationOptions) -> ValidationResult {
    Validator::default().validate_message(message, opts)
}

/// Validate a wire structure with default limits.
pub fn validate_value(value: &Value, opts: ValidationOptions) -> ValidationResult {
    Validator::default().validate_value(value, opts)
}

/// A field counts as present only when it is not `null`.
fn present<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn declared_pii_types(value: &Value) -> Vec<String> {
    let declared: Vec<String> = value
        .pointer("/pii_meta/types")
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !declared.is_empty() {
        return declared;
    }
    pii::detect_in(value.get("p").unwrap_or(&Value::Null)).type_names()
}

/// String field for log output, `<none>` when absent or not a string.
fn wire_str<'a>(value: &'a Value, name: &str) -> &'a str {
    value.get(name).and_then(Value::as_str).unwrap_or("<none>")
}

fn log_rejection(value: &Value, subject: Option<&PolicySubject<'_>>, result: &ValidationResult) {
    let loggable = subject.map_or(true, |s| policy::can_log(&s.classification));
    if loggable {
        let id = wire_str(value, "id");
        let op = wire_str(value, "op");
        debug!(
            id,
            op,
            errors = result.errors.len(),
            code = ?result.code,
            "Message failed validation"
        );
    } else {
        debug!(
            fingerprint = %signing::fingerprint(value),
            errors = result.errors.len(),
            code = ?result.code,
            "Unloggable message failed validation"
        );
    }
}
