//! Duplex follow-up protocol frames.
//!
//! Every text frame received on the follow-up channel is classified by
//! [`parse_frame`] into exactly one outcome:
//!
//! | Frame shape                                         | Outcome                          |
//! |-----------------------------------------------------|----------------------------------|
//! | not a JSON object                                   | [`ProtocolError::Malformed`]     |
//! | `{"error": ...}`                                    | [`ProtocolError::Remote`]        |
//! | `completionMessage`, terminal `status`, or closing `message` | [`InboundFrame::Completion`] |
//! | `{"question": "...", "options": [...]}`             | [`InboundFrame::Question`]       |
//! | anything else                                       | [`ProtocolError::Unrecognized`]  |
//!
//! The only outbound frame is `{"answer": "<text or option key>"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// `status` values that end the follow-up exchange.
pub const COMPLETION_STATUSES: &[&str] = &["completed", "ready_for_diagnosis"];

/// Lowercased phrases in a `message` field that announce the end of the exchange.
const COMPLETION_PHRASES: &[&str] = &["diagnosis complete", "thank you for your answers"];

/// Longest excerpt of an offending frame kept in error messages.
const EXCERPT_LEN: usize = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Frame types
// ─────────────────────────────────────────────────────────────────────────────

/// One selectable answer offered with a question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    /// Short key the peer expects back (e.g. `"A"`).
    pub key: String,
    /// Human-readable label.
    #[serde(rename = "value", alias = "label")]
    pub label: String,
}

impl AnswerOption {
    /// Build an option from a key and label.
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// A follow-up question produced by the remote peer. Immutable once received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// The question text.
    #[serde(rename = "question")]
    pub text: String,
    /// Ordered answer options; empty for free-text questions.
    #[serde(default)]
    pub options: Vec<AnswerOption>,
}

impl Question {
    /// Question with options.
    pub fn new(text: impl Into<String>, options: Vec<AnswerOption>) -> Self {
        Self {
            text: text.into(),
            options,
        }
    }

    /// Free-text question without options.
    pub fn free_text(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }

    /// Look up an option by key, ignoring ASCII case.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&AnswerOption> {
        let key = key.trim();
        self.options.iter().find(|o| o.key.eq_ignore_ascii_case(key))
    }
}

/// A successfully classified inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// The peer asks the next follow-up question.
    Question(Question),
    /// The peer finished the exchange.
    Completion {
        /// Closing message, empty when the peer sent none.
        message: String,
    },
}

/// The single outbound frame shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Answer text or selected option key.
    pub answer: String,
}

impl OutboundFrame {
    /// Wrap an answer.
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }

    /// Serialized wire text.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::json!({ "answer": self.answer }).to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A frame that could not be turned into protocol progress.
///
/// Protocol errors are reported and logged; they never close the link.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, not an object, or a recognised shape with invalid fields.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The peer reported an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Valid JSON object of no known shape.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),

    /// A different question arrived while one is still unanswered.
    #[error("unexpected question {received:?} while {pending:?} is unanswered")]
    UnexpectedQuestion {
        /// Text of the question still awaiting an answer.
        pending: String,
        /// Text of the question that was refused.
        received: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Classify one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ProtocolError::Malformed(format!(
            "expected a JSON object, got {}",
            excerpt(text)
        )));
    };

    if let Some(error) = map.get("error") {
        return Err(ProtocolError::Remote(value_text(error)));
    }

    if let Some(message) = completion_message(&map) {
        return Ok(InboundFrame::Completion { message });
    }

    if let Some(Value::String(question)) = map.get("question") {
        let options = match map.get("options") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| ProtocolError::Malformed(format!("invalid options: {e}")))?,
        };
        return Ok(InboundFrame::Question(Question::new(question.clone(), options)));
    }

    Err(ProtocolError::Unrecognized(excerpt(text)))
}

/// `Some(message)` when the object signals the end of the exchange.
fn completion_message(map: &Map<String, Value>) -> Option<String> {
    let message = map.get("message").and_then(Value::as_str);

    if let Some(done) = map.get("completionMessage") {
        return Some(value_text(done));
    }

    let terminal_status = map
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| COMPLETION_STATUSES.contains(&s));
    if terminal_status {
        return Some(message.unwrap_or_default().to_owned());
    }

    message
        .filter(|m| {
            let lower = m.to_lowercase();
            COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
        })
        .map(str::to_owned)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LEN {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(EXCERPT_LEN).collect();
    cut.push('…');
    cut
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
