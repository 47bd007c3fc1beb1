//! Ordered question/answer history for one session.
//!
//! Turns are kept in arrival order and never reordered. At most one turn is
//! unanswered at a time, and it is always the last one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::protocol::{ProtocolError, Question};

/// One question paired with its eventual answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// The question as received.
    pub question: Question,
    /// The answer, set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// When the question arrived.
    pub received_at: DateTime<Utc>,
}

impl Turn {
    /// Whether the turn still awaits an answer.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.answer.is_none()
    }
}

/// What [`QuestionHistory::push_question`] did with a question.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended as a new open turn.
    Appended,
    /// Identical to the open turn's question; dropped.
    Duplicate,
}

/// Append-only turn log with strict question/answer alternation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionHistory {
    turns: Vec<Turn>,
}

impl QuestionHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly received question.
    ///
    /// A re-delivery of the open question is reported as
    /// [`PushOutcome::Duplicate`]. A different question while one is open is
    /// refused with [`ProtocolError::UnexpectedQuestion`] and not recorded.
    pub fn push_question(
        &mut self,
        question: Question,
        received_at: DateTime<Utc>,
    ) -> Result<PushOutcome, ProtocolError> {
        if let Some(open) = self.pending() {
            if open.question == question {
                return Ok(PushOutcome::Duplicate);
            }
            return Err(ProtocolError::UnexpectedQuestion {
                pending: open.question.text.clone(),
                received: question.text,
            });
        }
        self.turns.push(Turn {
            question,
            answer: None,
            received_at,
        });
        Ok(PushOutcome::Appended)
    }

    /// The open turn, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&Turn> {
        self.turns.last().filter(|t| t.is_open())
    }

    /// Set the answer on the open turn.
    pub fn record_answer(&mut self, answer: impl Into<String>) -> Result<&Turn, SessionError> {
        let turn = self
            .turns
            .last_mut()
            .filter(|t| t.is_open())
            .ok_or(SessionError::NoOpenQuestion)?;
        turn.answer = Some(answer.into());
        Ok(turn)
    }

    /// All turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no question has arrived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AnswerOption;
    use assert_matches::assert_matches;

    fn fever() -> Question {
        Question::new(
            "Fever duration?",
            vec![
                AnswerOption::new("A", "1 day"),
                AnswerOption::new("B", "3+ days"),
            ],
        )
    }

    #[test]
    fn empty_history_has_no_pending() {
        let h = QuestionHistory::new();
        assert!(h.is_empty());
        assert!(h.pending().is_none());
    }

    #[test]
    fn question_then_answer() {
        let mut h = QuestionHistory::new();
        assert_eq!(h.push_question(fever(), Utc::now()).unwrap(), PushOutcome::Appended);
        assert!(h.pending().is_some());

        let turn = h.record_answer("B").unwrap();
        assert_eq!(turn.answer.as_deref(), Some("B"));
        assert!(h.pending().is_none());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn answer_without_question_is_refused() {
        let mut h = QuestionHistory::new();
        assert_matches!(h.record_answer("B"), Err(SessionError::NoOpenQuestion));
        assert!(h.is_empty());
    }

    #[test]
    fn answer_is_set_at_most_once() {
        let mut h = QuestionHistory::new();
        let _ = h.push_question(fever(), Utc::now()).unwrap();
        let _ = h.record_answer("A").unwrap();
        assert_matches!(h.record_answer("B"), Err(SessionError::NoOpenQuestion));
        assert_eq!(h.turns()[0].answer.as_deref(), Some("A"));
    }

    #[test]
    fn redelivered_question_is_duplicate() {
        let mut h = QuestionHistory::new();
        let _ = h.push_question(fever(), Utc::now()).unwrap();
        assert_eq!(h.push_question(fever(), Utc::now()).unwrap(), PushOutcome::Duplicate);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn different_question_while_open_is_unexpected() {
        let mut h = QuestionHistory::new();
        let _ = h.push_question(fever(), Utc::now()).unwrap();
        let err = h
            .push_question(Question::free_text("Any cough?"), Utc::now())
            .unwrap_err();
        assert_matches!(
            err,
            ProtocolError::UnexpectedQuestion { pending, received }
                if pending == "Fever duration?" && received == "Any cough?"
        );
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn order_is_preserved() {
        let mut h = QuestionHistory::new();
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let _ = h.push_question(Question::free_text(*text), Utc::now()).unwrap();
            let _ = h.record_answer(i.to_string()).unwrap();
        }
        let texts: Vec<_> = h.turns().iter().map(|t| t.question.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[test]
    fn same_text_after_answer_is_a_new_turn() {
        let mut h = QuestionHistory::new();
        let _ = h.push_question(fever(), Utc::now()).unwrap();
        let _ = h.record_answer("A").unwrap();
        assert_eq!(h.push_question(fever(), Utc::now()).unwrap(), PushOutcome::Appended);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn turn_serializes_camel_case() {
        let mut h = QuestionHistory::new();
        let _ = h.push_question(fever(), Utc::now()).unwrap();
        let json = serde_json::to_value(&h).unwrap();
        assert!(json[0].get("receivedAt").is_some());
        assert!(json[0].get("answer").is_none());
        assert_eq!(json[0]["question"]["question"], "Fever duration?");
    }
}
