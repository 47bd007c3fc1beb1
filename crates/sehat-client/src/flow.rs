//! Three-step diagnosis flow: patient info, follow-up questions, report.
//!
//! The controller owns the session id for the lifetime of one diagnosis.
//! Nothing is stored outside the instance; a new flow always gets a fresh id
//! from the service.

use std::fmt;
use std::sync::Arc;

use sehat_core::{
    Failure, PatientIntake, QuestionHistory, SessionError, SessionId, SessionSnapshot, Turn,
};
use sehat_settings::SehatSettings;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::gateway::{GatewayConfig, ProgressFn, RequestGateway};
use crate::link::{Connector, DuplexLink, LinkConfig, WsConnector};
use crate::report::ReportDocument;
use crate::session::{QuestionAnswerSession, SessionObserver, SessionPhase};

/// Where the user is in the flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStep {
    /// Collecting intake.
    PatientInfo,
    /// Answering follow-up questions.
    FollowUp,
    /// Report ready to fetch.
    Report,
}

impl fmt::Display for DiagnosisStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PatientInfo => "patient_info",
            Self::FollowUp => "follow_up",
            Self::Report => "report",
        })
    }
}

/// Errors from controller operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Operation not allowed at the current step.
    #[error("expected step {expected}, but the flow is at {actual}")]
    WrongStep {
        /// Step the operation needs.
        expected: DiagnosisStep,
        /// Current step.
        actual: DiagnosisStep,
    },
    /// No session id yet.
    #[error("no diagnosis session has been started")]
    NoSession,
    /// Local rejection from the follow-up session.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Service or connectivity failure.
    #[error(transparent)]
    Failure(#[from] Failure),
}

impl FlowError {
    /// Text suitable for the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Failure(failure) => failure.user_message(),
            other => other.to_string(),
        }
    }
}

/// Drives one diagnosis from intake to report.
pub struct DiagnosisFlowController {
    gateway: RequestGateway,
    connector: Arc<dyn Connector>,
    link_config: LinkConfig,
    step: DiagnosisStep,
    session_id: Option<SessionId>,
    session: Option<QuestionAnswerSession>,
}

impl fmt::Debug for DiagnosisFlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisFlowController")
            .field("step", &self.step)
            .field("session_id", &self.session_id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl DiagnosisFlowController {
    /// Controller at [`DiagnosisStep::PatientInfo`].
    pub fn new(
        gateway: RequestGateway,
        connector: Arc<dyn Connector>,
        link_config: LinkConfig,
    ) -> Self {
        Self {
            gateway,
            connector,
            link_config,
            step: DiagnosisStep::PatientInfo,
            session_id: None,
            session: None,
        }
    }

    /// Controller talking to the endpoints in `settings` over WebSocket.
    pub fn from_settings(settings: &SehatSettings) -> Result<Self, reqwest::Error> {
        let gateway = RequestGateway::new(GatewayConfig::from_settings(settings))?;
        Ok(Self::new(
            gateway,
            Arc::new(WsConnector),
            LinkConfig::from_settings(settings),
        ))
    }

    /// Current step.
    #[must_use]
    pub fn step(&self) -> DiagnosisStep {
        self.step
    }

    /// Session id of the current diagnosis.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Live follow-up session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&QuestionAnswerSession> {
        self.session.as_ref()
    }

    /// The request gateway.
    #[must_use]
    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    fn expect_step(&self, expected: DiagnosisStep) -> Result<(), FlowError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(FlowError::WrongStep {
                expected,
                actual: self.step,
            })
        }
    }

    fn live_session(&self) -> Result<&QuestionAnswerSession, FlowError> {
        self.session.as_ref().ok_or(FlowError::NoSession)
    }

    /// Submit intake, then open the follow-up session.
    pub async fn submit_intake(
        &mut self,
        intake: &PatientIntake,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<SessionId, FlowError> {
        self.expect_step(DiagnosisStep::PatientInfo)?;
        let session_id = self.gateway.submit_intake(intake).await?;

        let (link, notices) = DuplexLink::new(Arc::clone(&self.connector), self.link_config.clone());
        let session = QuestionAnswerSession::start(session_id.clone(), link, notices, observer);

        self.session_id = Some(session_id.clone());
        self.session = Some(session);
        self.step = DiagnosisStep::FollowUp;
        info!(session_id = %session_id, step = %self.step, "diagnosis started");
        Ok(session_id)
    }

    /// Answer the open follow-up question.
    pub async fn answer(&self, text: &str) -> Result<Turn, FlowError> {
        Ok(self.live_session()?.answer(text).await?)
    }

    /// Turns so far, if a session exists.
    pub async fn history(&self) -> Option<QuestionHistory> {
        match &self.session {
            Some(session) => Some(session.history().await),
            None => None,
        }
    }

    /// Wait until the follow-up finishes.
    ///
    /// Completion moves the flow to [`DiagnosisStep::Report`]. A terminal
    /// connectivity failure is returned and the flow must be restarted.
    pub async fn wait_for_completion(&mut self) -> Result<(), FlowError> {
        self.expect_step(DiagnosisStep::FollowUp)?;
        let mut phase = self.live_session()?.watch_phase();
        let reached = phase
            .wait_for(|p| p.is_terminal())
            .await
            .map(|p| *p)
            .unwrap_or(SessionPhase::Closed);

        match reached {
            SessionPhase::Complete => {
                self.step = DiagnosisStep::Report;
                info!(session_id = ?self.session_id, "follow-up complete, report ready");
                Ok(())
            }
            SessionPhase::Failed => match self.live_session()?.failure().await {
                Some(failure) => Err(failure.into()),
                None => Err(SessionError::SessionFinished.into()),
            },
            SessionPhase::Closed | SessionPhase::Active => {
                Err(SessionError::SessionFinished.into())
            }
        }
    }

    /// Download the report for the current session.
    pub async fn fetch_report(
        &self,
        progress: Option<ProgressFn>,
    ) -> Result<ReportDocument, FlowError> {
        let session_id = self.session_id.as_ref().ok_or(FlowError::NoSession)?;
        Ok(self.gateway.fetch_report(session_id, progress).await?)
    }

    /// Fetch the session document for the current session.
    pub async fn fetch_snapshot(&self) -> Result<SessionSnapshot, FlowError> {
        let session_id = self.session_id.as_ref().ok_or(FlowError::NoSession)?;
        Ok(self.gateway.fetch_session(session_id).await?)
    }

    /// Close any live session and return to [`DiagnosisStep::PatientInfo`].
    pub async fn start_new_diagnosis(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        if let Some(previous) = self.session_id.take() {
            info!(previous = %previous, "diagnosis reset");
        }
        self.step = DiagnosisStep::PatientInfo;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
