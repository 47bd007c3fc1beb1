//! Question/answer session over one [`DuplexLink`].
//!
//! [`QuestionAnswerSession`] turns link notices into observer callbacks. An
//! actor task consumes the notices; it and [`QuestionAnswerSession::answer`]
//! both go through one [`SessionCore`] behind an async mutex, so a question
//! can never overtake the answer to the previous one.
//!
//! Callbacks run on the actor task while the session lock is held. They must
//! not call back into the session.

pub mod exchange;

use std::sync::Arc;

use chrono::Utc;
use sehat_core::{Failure, Question, QuestionHistory, SessionError, SessionId, Turn};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use exchange::{FrameOutcome, SessionCore, SessionPhase};

use crate::link::{ConnectionState, DuplexLink, LinkNotice};

/// Upward callbacks. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    /// A new question is waiting for an answer.
    fn on_question(&self, _question: &Question) {}
    /// The exchange finished. Fires at most once.
    fn on_complete(&self, _message: &str) {}
    /// A frame was rejected or connectivity was lost.
    fn on_error(&self, _failure: &Failure) {}
    /// The link became open or stopped being open.
    fn on_connection_status(&self, _open: bool) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

struct Shared {
    core: Mutex<SessionCore>,
    phase: watch::Sender<SessionPhase>,
    observer: Arc<dyn SessionObserver>,
}

impl Shared {
    fn publish(&self, core: &SessionCore) {
        let _ = self.phase.send_replace(core.phase());
    }
}

/// A live follow-up session.
pub struct QuestionAnswerSession {
    session_id: SessionId,
    shared: Arc<Shared>,
    link: Arc<DuplexLink>,
    phase: watch::Receiver<SessionPhase>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for QuestionAnswerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionAnswerSession")
            .field("session_id", &self.session_id)
            .field("phase", &*self.phase.borrow())
            .field("link", &self.link.state())
            .finish()
    }
}

impl QuestionAnswerSession {
    /// Open `link` for `session_id` and start delivering callbacks.
    ///
    /// `notices` must be the receiver returned alongside `link`.
    pub fn start(
        session_id: SessionId,
        link: DuplexLink,
        notices: mpsc::UnboundedReceiver<LinkNotice>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Active);
        let shared = Arc::new(Shared {
            core: Mutex::new(SessionCore::new(session_id.clone())),
            phase: phase_tx,
            observer,
        });
        let link = Arc::new(link);
        let cancel = CancellationToken::new();

        link.open(session_id.clone());
        let _ = tokio::spawn(run_actor(
            Arc::clone(&shared),
            Arc::clone(&link),
            notices,
            cancel.clone(),
        ));
        info!(session_id = %session_id, "follow-up session started");

        Self {
            session_id,
            shared,
            link,
            phase: phase_rx,
            cancel,
        }
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Answer the open question with free text or an option key.
    ///
    /// Rejected locally, without sending or touching the history, when no
    /// question is open, the link is not open, the session has finished, or
    /// the text is blank.
    pub async fn answer(&self, text: &str) -> Result<Turn, SessionError> {
        let mut core = self.shared.core.lock().await;
        let frame = core.prepare_answer(text)?;
        if self.link.state() != ConnectionState::Open || !self.link.send(frame.to_text()).await {
            debug!(session_id = %self.session_id, "link not open, answer rejected");
            return Err(SessionError::LinkNotOpen);
        }
        let turn = core.commit_answer(&frame)?.clone();
        info!(session_id = %self.session_id, turn = core.history().len(), "answer sent");
        Ok(turn)
    }

    /// Snapshot of the turns so far.
    pub async fn history(&self) -> QuestionHistory {
        self.shared.core.lock().await.history().clone()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Receiver observing phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Why the session failed, if it has.
    pub async fn failure(&self) -> Option<Failure> {
        self.shared.core.lock().await.failure().cloned()
    }

    /// State of the underlying link.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Close the session and its link. No callback fires after this returns.
    pub async fn close(&self) {
        {
            let mut core = self.shared.core.lock().await;
            if core.close() {
                self.shared.publish(&core);
                info!(session_id = %self.session_id, "follow-up session closed");
            }
        }
        self.cancel.cancel();
        self.link.close().await;
    }
}

impl Drop for QuestionAnswerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_actor(
    shared: Arc<Shared>,
    link: Arc<DuplexLink>,
    mut notices: mpsc::UnboundedReceiver<LinkNotice>,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            notice = notices.recv() => match notice {
                Some(notice) => notice,
                None => break,
            },
        };

        let mut core = shared.core.lock().await;
        if core.phase().is_terminal() {
            break;
        }
        match notice {
            LinkNotice::Frame(text) => match core.on_frame(&text, Utc::now()) {
                FrameOutcome::Question(question) => shared.observer.on_question(&question),
                FrameOutcome::Complete { message } => {
                    shared.publish(&core);
                    link.close().await;
                    shared.observer.on_complete(&message);
                    break;
                }
                FrameOutcome::Error(failure) => shared.observer.on_error(&failure),
                FrameOutcome::Duplicate | FrameOutcome::Ignored => {}
            },
            LinkNotice::Status { open } => shared.observer.on_connection_status(open),
            LinkNotice::Reconnecting { attempt, delay } => {
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                debug!(session_id = %core.session_id(), attempt, delay_ms, "link reconnecting");
            }
            LinkNotice::ConnectivityExhausted { attempts } => {
                let failure = Failure::ConnectivityExhausted { attempts };
                if core.fail(failure.clone()) {
                    shared.publish(&core);
                    warn!(session_id = %core.session_id(), attempts, "session failed, connectivity exhausted");
                    shared.observer.on_error(&failure);
                }
                break;
            }
            LinkNotice::Closed => break,
        }
    }
    debug!("session actor stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
