//! Decoding of agent output into typed, verdict-bearing decisions.
//!
//! This is the only path by which free-form agent output becomes data that can
//! influence hierarchy transitions. Decoding is: JSON parse, JSON Schema
//! validation against the embedded schema for the requested shape, then a
//! typed decode.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

const CHALLENGE_DECISION_SCHEMA: &str = include_str!("../../schemas/challenge-decision.schema.json");
const REVIEW_DECISION_SCHEMA: &str = include_str!("../../schemas/review-decision.schema.json");

static CHALLENGE_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(CHALLENGE_DECISION_SCHEMA));
static REVIEW_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(REVIEW_DECISION_SCHEMA));

fn compile(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema should compile")
}

/// Named decision shape an agent is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionSchema {
    #[serde(rename = "challenge-decision")]
    Challenge,
    #[serde(rename = "review-decision")]
    Review,
}

impl DecisionSchema {
    pub fn name(self) -> &'static str {
        match self {
            DecisionSchema::Challenge => "challenge-decision",
            DecisionSchema::Review => "review-decision",
        }
    }

    /// Raw JSON Schema document, suitable for handing to an agent CLI.
    pub fn document(self) -> &'static str {
        match self {
            DecisionSchema::Challenge => CHALLENGE_DECISION_SCHEMA,
            DecisionSchema::Review => REVIEW_DECISION_SCHEMA,
        }
    }

    fn validator(self) -> &'static Validator {
        match self {
            DecisionSchema::Challenge => &CHALLENGE_VALIDATOR,
            DecisionSchema::Review => &REVIEW_VALIDATOR,
        }
    }
}

impl fmt::Display for DecisionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecisionSchema {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "challenge-decision" => Ok(DecisionSchema::Challenge),
            "review-decision" => Ok(DecisionSchema::Review),
            other => Err(Error::schema(
                other,
                vec![format!("unknown decision schema '{other}'")],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsRevision,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::NeedsRevision => "needs_revision",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeDecision {
    pub verdict: Verdict,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub file: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub verdict: Verdict,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<ReviewIssue>>,
}

/// A decoded decision, tagged by the schema it was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Challenge(ChallengeDecision),
    Review(ReviewDecision),
}

impl Decision {
    pub fn schema(&self) -> DecisionSchema {
        match self {
            Decision::Challenge(_) => DecisionSchema::Challenge,
            Decision::Review(_) => DecisionSchema::Review,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self {
            Decision::Challenge(d) => d.verdict,
            Decision::Review(d) => d.verdict,
        }
    }

    pub fn feedback(&self) -> &str {
        match self {
            Decision::Challenge(d) => &d.feedback,
            Decision::Review(d) => &d.feedback,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict() == Verdict::Approved
    }

    /// Pretty JSON of the payload (the persisted feedback file format).
    pub fn to_json(&self) -> String {
        let value = match self {
            Decision::Challenge(d) => serde_json::to_value(d),
            Decision::Review(d) => serde_json::to_value(d),
        };
        // Plain structs of strings and enums always serialize.
        let mut buf = value
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_default();
        buf.push('\n');
        buf
    }

    /// Human-readable summary used when feeding a decision back into prompts.
    pub fn render(&self) -> String {
        let mut buf = format!("verdict: {}\n\n{}\n", self.verdict(), self.feedback().trim());
        if let Decision::Review(ReviewDecision {
            issues: Some(issues),
            ..
        }) = self
            && !issues.is_empty()
        {
            buf.push_str("\nissues:\n");
            for issue in issues {
                buf.push_str(&format!("- {}: {}\n", issue.file, issue.description));
            }
        }
        buf
    }
}

/// Decode raw agent output against the named decision shape.
///
/// Fails with [`Error::SchemaValidation`] on malformed JSON, a missing or
/// mistyped field, or a verdict other than `approved` / `needs_revision`.
pub fn parse_decision(raw: &str, schema: DecisionSchema) -> Result<Decision> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|err| Error::schema(schema.name(), vec![format!("invalid json: {err}")]))?;

    let messages: Vec<String> = schema
        .validator()
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(Error::schema(schema.name(), messages));
    }

    let decoded = match schema {
        DecisionSchema::Challenge => serde_json::from_value(value).map(Decision::Challenge),
        DecisionSchema::Review => serde_json::from_value(value).map(Decision::Review),
    };
    decoded.map_err(|err| Error::schema(schema.name(), vec![err.to_string()]))
}

/// Accept a single surrounding Markdown fence (```json ... ```).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((lang, inner)) if !lang.trim().contains(char::is_whitespace) => inner.trim(),
        _ => body.trim(),
    }
}
