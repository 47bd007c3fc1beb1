//! Synchronous session bookkeeping: frame classification, history, phase.
//!
//! Kept free of I/O so the alternation rules can be tested without a link.

use chrono::{DateTime, Utc};
use sehat_core::protocol::parse_frame;
use sehat_core::{
    Failure, InboundFrame, OutboundFrame, PushOutcome, Question, QuestionHistory, SessionError,
    SessionId, Turn,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle of a follow-up session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Exchanging questions and answers.
    Active,
    /// The peer signalled completion.
    Complete,
    /// Connectivity was lost for good.
    Failed,
    /// Closed by the owner.
    Closed,
}

impl SessionPhase {
    /// Whether the session accepts no more frames or answers.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }
}

/// What one inbound frame amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A new question was recorded.
    Question(Question),
    /// Re-delivery of the open question; nothing recorded.
    Duplicate,
    /// The exchange finished.
    Complete {
        /// Closing message from the peer.
        message: String,
    },
    /// The frame was rejected. The session stays usable.
    Error(Failure),
    /// The session is no longer active.
    Ignored,
}

/// History and phase of one session.
#[derive(Clone, Debug)]
pub struct SessionCore {
    session_id: SessionId,
    history: QuestionHistory,
    phase: SessionPhase,
    failure: Option<Failure>,
}

impl SessionCore {
    /// Fresh, active session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            history: QuestionHistory::new(),
            phase: SessionPhase::Active,
            failure: None,
        }
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Turns so far.
    #[must_use]
    pub fn history(&self) -> &QuestionHistory {
        &self.history
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Why the session failed, once it has.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Classify and record one inbound frame.
    pub fn on_frame(&mut self, text: &str, now: DateTime<Utc>) -> FrameOutcome {
        if self.phase.is_terminal() {
            debug!(session_id = %self.session_id, phase = ?self.phase, "session finished, frame ignored");
            return FrameOutcome::Ignored;
        }
        match parse_frame(text) {
            Ok(InboundFrame::Question(question)) => {
                match self.history.push_question(question.clone(), now) {
                    Ok(PushOutcome::Appended) => {
                        info!(
                            session_id = %self.session_id,
                            turn = self.history.len(),
                            options = question.options.len(),
                            "question received"
                        );
                        FrameOutcome::Question(question)
                    }
                    Ok(PushOutcome::Duplicate) => {
                        debug!(session_id = %self.session_id, "duplicate question dropped");
                        FrameOutcome::Duplicate
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "question out of turn");
                        FrameOutcome::Error(Failure::Protocol(e))
                    }
                }
            }
            Ok(InboundFrame::Completion { message }) => {
                self.phase = SessionPhase::Complete;
                info!(session_id = %self.session_id, turns = self.history.len(), "follow-up complete");
                FrameOutcome::Complete { message }
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "protocol error");
                FrameOutcome::Error(Failure::Protocol(e))
            }
        }
    }

    /// Check that `text` may be sent now and build its frame.
    ///
    /// Does not modify the history; see [`Self::commit_answer`].
    pub fn prepare_answer(&self, text: &str) -> Result<OutboundFrame, SessionError> {
        if self.phase.is_terminal() {
            return Err(SessionError::SessionFinished);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyAnswer);
        }
        if self.history.pending().is_none() {
            return Err(SessionError::NoOpenQuestion);
        }
        Ok(OutboundFrame::answer(text))
    }

    /// Record a sent answer on the open turn.
    pub fn commit_answer(&mut self, frame: &OutboundFrame) -> Result<&Turn, SessionError> {
        self.history.record_answer(frame.answer.clone())
    }

    /// Mark failed with `failure`. Returns `false` if already finished.
    pub fn fail(&mut self, failure: Failure) -> bool {
        if !self.finish(SessionPhase::Failed) {
            return false;
        }
        self.failure = Some(failure);
        true
    }

    /// Mark closed. Returns `false` if already finished.
    pub fn close(&mut self) -> bool {
        self.finish(SessionPhase::Closed)
    }

    fn finish(&mut self, phase: SessionPhase) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = phase;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
