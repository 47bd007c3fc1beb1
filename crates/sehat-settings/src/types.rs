//! Settings type definitions.
//!
//! Every section uses `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the keys it changes. Each type's [`Default`] holds
//! the production values.

use std::time::Duration;

use sehat_core::BackoffPolicy;
use sehat_core::backoff::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_MAX_RETRIES,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "api": { "baseUrl": "https://diagnosis.example.org" },
///   "link": { "maxReconnectAttempts": 8 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SehatSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Service endpoints and request timeout.
    pub api: ApiSettings,
    /// Request retry policy.
    pub retry: RetrySettings,
    /// Duplex link timing and reconnect policy.
    pub link: LinkSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Report download settings.
    pub report: ReportSettings,
}

impl Default for SehatSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "sehat".to_string(),
            api: ApiSettings::default(),
            retry: RetrySettings::default(),
            link: LinkSettings::default(),
            logging: LoggingSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl SehatSettings {
    /// Reject values no client could work with.
    pub fn validate(&self) -> Result<()> {
        check_url("api.baseUrl", &self.api.base_url, &["http", "https"])?;
        check_url("api.chatUrl", &self.api.chat_url, &["http", "https"])?;
        if let Some(ws) = &self.api.ws_url {
            check_url("api.wsUrl", ws, &["ws", "wss"])?;
        }
        if self.api.request_timeout_ms == 0 {
            return Err(invalid("api.requestTimeoutMs", "must be greater than zero"));
        }
        if self.link.connect_timeout_ms == 0 {
            return Err(invalid("link.connectTimeoutMs", "must be greater than zero"));
        }
        if self.link.heartbeat_interval_ms == 0 {
            return Err(invalid("link.heartbeatIntervalMs", "must be greater than zero"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.baseDelayMs", "must not exceed retry.maxDelayMs"));
        }
        if self.link.reconnect_base_delay_ms > self.link.reconnect_max_delay_ms {
            return Err(invalid(
                "link.reconnectBaseDelayMs",
                "must not exceed link.reconnectMaxDelayMs",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue {
        key,
        reason: reason.into(),
    }
}

fn check_url(key: &'static str, url: &str, schemes: &[&str]) -> Result<()> {
    let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
    match scheme {
        Some(s) if schemes.contains(&s.as_str()) => Ok(()),
        _ => Err(invalid(
            key,
            format!("{url:?} must start with {}://", schemes.join("://, ")),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Service endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the diagnosis service (intake, report, follow-up).
    pub base_url: String,
    /// Explicit base URL for the follow-up channel. Derived from
    /// `base_url` (`http`→`ws`, `https`→`wss`) when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Base URL of the medical chatbot.
    pub chat_url: String,
    /// Per-attempt request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            ws_url: None,
            chat_url: "https://medicalbot-and-report-analyser.onrender.com".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ApiSettings {
    /// Per-attempt request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Request retry configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0–1.0). Zero keeps delays deterministic.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: 0.0,
        }
    }
}

impl RetrySettings {
    /// Backoff policy for request retries.
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay_ms, self.max_delay_ms).with_jitter(self.jitter_factor)
    }
}

/// Duplex link configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSettings {
    /// Time allowed for a connection to be established, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Keep-alive interval while open, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Reconnect cycles before the link gives up.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Maximum reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 15_000,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl LinkSettings {
    /// Backoff policy for reconnect delays.
    #[must_use]
    pub fn reconnect_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.reconnect_base_delay_ms, self.reconnect_max_delay_ms)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive (`warn`, `sehat_client=debug`, ...).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: sehat_core::logging::DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// Report download settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    /// Directory downloaded reports are written to.
    pub output_dir: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
