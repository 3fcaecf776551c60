//! Pattern-based PII detection, masking and redaction.
//!
//! The pattern table is compiled once on first use and never mutated.
//! Structured payloads are flattened to their JSON text before scanning,
//! so PII at any nesting depth is found.
//!
//! This is a heuristic, not a certified PII engine. Known gaps: phone
//! numbers written with parentheses and a country code, unseparated SSNs
//! adjacent to other digits, and random 16-digit strings that look like
//! card numbers.

use regex_lite::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// A category of personal data the detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Ipv4,
    Address,
    Dob,
}

impl PiiCategory {
    /// All categories, in scan order.
    pub const ALL: [PiiCategory; 7] = [
        PiiCategory::Email,
        PiiCategory::Phone,
        PiiCategory::Ssn,
        PiiCategory::CreditCard,
        PiiCategory::Ipv4,
        PiiCategory::Address,
        PiiCategory::Dob,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PiiCategory::Email => "email",
            PiiCategory::Phone => "phone",
            PiiCategory::Ssn => "ssn",
            PiiCategory::CreditCard => "credit_card",
            PiiCategory::Ipv4 => "ipv4",
            PiiCategory::Address => "address",
            PiiCategory::Dob => "dob",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn pattern(&self) -> &'static str {
        match self {
            PiiCategory::Email => r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            PiiCategory::Phone => r"(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
            PiiCategory::Ssn => r"\b\d{3}-?\d{2}-?\d{4}\b",
            PiiCategory::CreditCard => r"\b(?:\d{4}[-\s]?){3}\d{4}\b",
            PiiCategory::Ipv4 => r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            PiiCategory::Address => {
                r"(?i)\b\d{1,5}\s+(?:[a-z]+\s+){1,4}(?:street|st|avenue|ave|boulevard|blvd|road|rd|lane|ln|drive|dr|court|ct|way|place|pl)\b"
            }
            PiiCategory::Dob => r"\b(?:0?[1-9]|1[0-2])[-/](?:0?[1-9]|[12]\d|3[01])[-/](?:19|20)\d{2}\b",
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn patterns() -> &'static [(PiiCategory, Regex)] {
    static PATTERNS: OnceLock<Vec<(PiiCategory, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PiiCategory::ALL
            .into_iter()
            .map(|c| (c, Regex::new(c.pattern()).expect("PII pattern is valid")))
            .collect()
    })
}

/// Matches of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFinding {
    #[serde(rename = "type")]
    pub category: PiiCategory,
    pub count: usize,
    /// Summary that does not reveal the matched values.
    pub preview: String,
}

/// Outcome of a PII scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiReport {
    pub has_pii: bool,
    pub findings: Vec<PiiFinding>,
    /// Matched categories, in scan order.
    pub types: Vec<PiiCategory>,
}

impl PiiReport {
    pub fn type_names(&self) -> Vec<String> {
        self.types.iter().map(|c| c.name().to_string()).collect()
    }
}

/// Scan text for PII.
pub fn detect(text: &str) -> PiiReport {
    let mut report = PiiReport::default();
    for (category, re) in patterns() {
        let count = re.find_iter(text).count();
        if count > 0 {
            report.has_pii = true;
            report.types.push(*category);
            report.findings.push(PiiFinding {
                category: *category,
                count,
                preview: format!("{count} potential {category} pattern(s) found"),
            });
        }
    }
    report
}

/// Scan a structured payload. Strings are scanned as-is; anything else is
/// serialized first.
pub fn detect_in(value: &Value) -> PiiReport {
    match value {
        Value::String(s) => detect(s),
        Value::Null => PiiReport::default(),
        other => detect(&other.to_string()),
    }
}

fn mask_value(value: &str, mask_char: char) -> String {
    let len = value.chars().count();
    if len <= 4 {
        return std::iter::repeat(mask_char).take(len).collect();
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    if let Some(first) = chars.next() {
        out.push(first);
    }
    out.extend(std::iter::repeat(mask_char).take(len - 2));
    if let Some(last) = chars.last() {
        out.push(last);
    }
    out
}

/// Mask every match, keeping only its first and last character.
///
/// Matches of four characters or fewer are masked entirely. `categories`
/// limits which patterns apply; `None` applies all of them.
pub fn mask(text: &str, categories: Option<&[PiiCategory]>, mask_char: char) -> String {
    let mut masked = text.to_string();
    for (category, re) in patterns() {
        if categories.is_some_and(|wanted| !wanted.contains(category)) {
            continue;
        }
        masked = re
            .replace_all(&masked, |caps: &Captures<'_>| mask_value(&caps[0], mask_char))
            .into_owned();
    }
    masked
}

/// Replace matches with a `[REDACTED:<CATEGORY>]` marker.
pub fn redact(text: &str, category: Option<PiiCategory>) -> String {
    let mut redacted = text.to_string();
    for (c, re) in patterns() {
        if category.is_some_and(|wanted| wanted != *c) {
            continue;
        }
        let marker = format!("[REDACTED:{}]", c.name().to_uppercase());
        redacted = re.replace_all(&redacted, NoExpand(&marker)).into_owned();
    }
    redacted
}
