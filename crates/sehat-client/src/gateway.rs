//! Request/response calls to the diagnosis service with bounded retries.
//!
//! Every operation goes through [`RequestGateway::call`], which classifies
//! each attempt:
//!
//! | Attempt result               | Action                                    |
//! |------------------------------|-------------------------------------------|
//! | 2xx, body decodes            | return                                    |
//! | 2xx, body does not decode    | [`Failure::InvalidResponse`], no retry    |
//! | 2xx, body breaks mid-read    | [`Failure::InvalidResponse`], no retry    |
//! | 4xx (any non-5xx error)      | [`Failure::ClientRejected`], no retry     |
//! | 5xx                          | retry, then [`Failure::ServerFailure`]    |
//! | no response                  | retry, then [`Failure::NetworkFailure`]   |
//!
//! Once a 2xx status arrives the server has acted on the request, so a body
//! that breaks afterwards is never retried. Retrying intake there would open
//! a second session.
//!
//! Each call owns a fresh [`RetryBudget`], so concurrent calls never share
//! retry state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use sehat_core::{
    BackoffPolicy, Failure, PatientIntake, RetryBudget, SessionId, SessionSnapshot,
};
use sehat_settings::SehatSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::report::{DEFAULT_CONTENT_TYPE, ReportDocument};

/// Errors returned by gateway operations.
pub type GatewayError = Failure;

/// Download progress callback, called with whole percentages 0..=100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoints, timeout, and retry policy for a [`RequestGateway`].
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    /// Diagnosis service base URL.
    pub base_url: String,
    /// Chatbot base URL.
    pub chat_url: String,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay between retries.
    pub backoff: BackoffPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_settings(&SehatSettings::default())
    }
}

impl GatewayConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &SehatSettings) -> Self {
        Self {
            base_url: settings.api.base_url.clone(),
            chat_url: settings.api.chat_url.clone(),
            request_timeout: settings.api.request_timeout(),
            max_retries: settings.retry.max_retries,
            backoff: settings.retry.policy(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IntakeResponse {
    session_id: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    answer: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Attempt classification
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one failed attempt, before retry policy is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptError {
    /// No response: connect failure or timeout before the status line.
    Network(String),
    /// Non-success HTTP status with the server's message.
    Status {
        /// HTTP status code.
        status: u16,
        /// Human-readable message.
        message: String,
    },
    /// Success status but the body did not decode.
    Decode(String),
    /// Success status but the body stream broke before it ended.
    Body(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::Body(_) => false,
        }
    }

    fn into_failure(self, attempts: u32) -> Failure {
        match self {
            Self::Network(message) => Failure::NetworkFailure { message, attempts },
            Self::Status { status, message } if status >= 500 => Failure::ServerFailure {
                status,
                message,
                attempts,
            },
            Self::Status { status, message } => Failure::ClientRejected { status, message },
            Self::Decode(message) => Failure::InvalidResponse(message),
            Self::Body(message) => {
                Failure::InvalidResponse(format!("response body interrupted: {message}"))
            }
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(m) => write!(f, "network: {m}"),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Decode(m) => write!(f, "decode: {m}"),
            Self::Body(m) => write!(f, "body: {m}"),
        }
    }
}

/// Pull the human-readable message out of an error body.
///
/// Looks at `message`, then `detail`, then `error`.
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| match value.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Null | Value::String(_) => None,
            other => Some(other.to_string()),
        })
}

/// Send one request; non-success statuses become [`AttemptError::Status`].
async fn send_checked(request: RequestBuilder) -> Result<Response, AttemptError> {
    let response = request
        .send()
        .await
        .map_err(|e| AttemptError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = status.canonical_reason().unwrap_or("request failed");
    let body = response.text().await.unwrap_or_default();
    Err(AttemptError::Status {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| reason.to_owned()),
    })
}

/// Read the whole body and decode it as JSON.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, AttemptError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| AttemptError::Body(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| AttemptError::Decode(e.to_string()))
}

/// `loaded / total` as a whole percentage, rounded half up and capped at 100.
#[allow(clippy::cast_possible_truncation)]
fn percent(loaded: u64, total: u64) -> u8 {
    let scaled = loaded.saturating_mul(100).saturating_add(total / 2) / total;
    scaled.min(100) as u8
}

/// Stream the body, reporting whole-percent progress when the length is known.
#[allow(clippy::cast_possible_truncation)]
async fn read_with_progress(
    response: Response,
    progress: Option<&ProgressFn>,
) -> Result<Bytes, AttemptError> {
    let total = response.content_length().filter(|n| *n > 0);
    let mut body = BytesMut::with_capacity(total.map_or(0, |n| n.min(16 << 20) as usize));
    let mut stream = response.bytes_stream();
    let mut last_reported: Option<u8> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AttemptError::Body(e.to_string()))?;
        body.extend_from_slice(&chunk);
        if let (Some(total), Some(report)) = (total, progress) {
            let pct = percent(body.len() as u64, total);
            if last_reported != Some(pct) {
                last_reported = Some(pct);
                report(pct);
            }
        }
    }

    if let Some(report) = progress {
        if total.is_some() && last_reported != Some(100) {
            report(100);
        }
    }
    Ok(body.freeze())
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for the diagnosis and chatbot services.
#[derive(Clone, Debug)]
pub struct RequestGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl RequestGateway {
    /// Build a gateway with its own connection pool.
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn report_url(&self, session_id: &SessionId) -> String {
        Self::url(&self.config.base_url, &format!("generate_report/{session_id}"))
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut budget = RetryBudget::new(self.config.max_retries, self.config.backoff);
        loop {
            let tries = budget.attempt() + 1;
            let err = match attempt().await {
                Ok(value) => {
                    if tries > 1 {
                        info!(operation, attempts = tries, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(operation, error = %err, "request failed permanently");
                return Err(err.into_failure(tries));
            }

            let delay = if self.config.backoff.jitter_factor > 0.0 {
                budget.next_jittered_delay(rand::random::<f64>())
            } else {
                budget.next_delay()
            };
            let Some(delay) = delay else {
                warn!(operation, attempts = tries, error = %err, "retries exhausted");
                return Err(err.into_failure(tries));
            };

            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            warn!(operation, attempt = tries, delay_ms, error = %err, "request failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    /// Submit patient intake and receive the session id.
    ///
    /// Invalid intake is rejected locally without a request.
    #[instrument(skip_all, fields(operation = "submit_intake"))]
    pub async fn submit_intake(&self, intake: &PatientIntake) -> Result<SessionId, Failure> {
        intake.validate()?;
        let url = Self::url(&self.config.base_url, "symptom");
        let response: IntakeResponse = self
            .call("submit_intake", || {
                let request = self.client.post(&url).json(intake);
                async move { read_json(send_checked(request).await?).await }
            })
            .await?;

        let session_id = SessionId::from(response.session_id);
        if session_id.is_blank() {
            return Err(Failure::InvalidResponse("empty session_id".into()));
        }
        info!(session_id = %session_id, "intake accepted");
        Ok(session_id)
    }

    /// Download the generated report.
    #[instrument(skip_all, fields(operation = "fetch_report", session_id = %session_id))]
    pub async fn fetch_report(
        &self,
        session_id: &SessionId,
        progress: Option<ProgressFn>,
    ) -> Result<ReportDocument, Failure> {
        let url = self.report_url(session_id);
        let (bytes, content_type) = self
            .call("fetch_report", || {
                let request = self.client.get(&url);
                let progress = progress.clone();
                async move {
                    let response = send_checked(request).await?;
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(DEFAULT_CONTENT_TYPE)
                        .to_owned();
                    let bytes = read_with_progress(response, progress.as_ref()).await?;
                    Ok((bytes, content_type))
                }
            })
            .await?;

        debug!(bytes = bytes.len(), content_type = %content_type, "report downloaded");
        Ok(ReportDocument {
            session_id: session_id.clone(),
            bytes,
            content_type,
        })
    }

    /// Fetch the JSON view of a session (report plus patient details).
    #[instrument(skip_all, fields(operation = "fetch_session", session_id = %session_id))]
    pub async fn fetch_session(&self, session_id: &SessionId) -> Result<SessionSnapshot, Failure> {
        let url = self.report_url(session_id);
        self.call("fetch_session", || {
            let request = self.client.get(&url).header(ACCEPT, "application/json");
            async move { read_json(send_checked(request).await?).await }
        })
        .await
    }

    /// Ask the medical chatbot a free-form question.
    #[instrument(skip_all, fields(operation = "ask_chatbot"))]
    pub async fn ask_chatbot(&self, question: &str) -> Result<String, Failure> {
        let url = Self::url(&self.config.chat_url, "chat");
        let response: ChatResponse = self
            .call("ask_chatbot", || {
                let request = self.client.post(&url).json(&ChatRequest { question });
                async move { read_json(send_checked(request).await?).await }
            })
            .await?;
        Ok(response.answer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
