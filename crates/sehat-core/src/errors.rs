//! Error taxonomy for the diagnosis client.
//!
//! - [`Failure`]: every failure delivered to the owner, whether it came from a
//!   request, the duplex link, or a frame. Failures travel the same channels
//!   as successes and are never raised across a callback boundary.
//! - [`SessionError`]: local, synchronous refusals of `answer()`. Nothing is sent.
//! - [`IntakeError`]: local intake validation. Nothing is sent.

use thiserror::Error;

use crate::protocol::ProtocolError;

// ─────────────────────────────────────────────────────────────────────────────
// Failure
// ─────────────────────────────────────────────────────────────────────────────

/// A failure surfaced to the owner of a request or session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Failure {
    /// 4xx response. Permanent; never retried.
    #[error("request rejected ({status}): {message}")]
    ClientRejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided human-readable message.
        message: String,
    },

    /// 5xx response on the last of all attempts.
    #[error("service error ({status}) after {attempts} attempts: {message}")]
    ServerFailure {
        /// HTTP status code of the last attempt.
        status: u16,
        /// Server-provided message of the last attempt.
        message: String,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// No response on the last of all attempts.
    #[error("unable to reach service after {attempts} attempts: {message}")]
    NetworkFailure {
        /// Underlying transport error.
        message: String,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// A 2xx response whose body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Intake data rejected locally before any request.
    #[error("invalid intake: {0}")]
    InvalidIntake(#[from] IntakeError),

    /// An inbound frame that made no protocol progress.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The duplex link used every reconnect attempt. Terminal for the session.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectivityExhausted {
        /// Reconnect attempts made.
        attempts: u32,
    },
}

impl Failure {
    /// Whether the failure came from a transient condition (network or 5xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. } | Self::ServerFailure { .. })
    }

    /// Whether the failure ends the session it occurred in.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectivityExhausted { .. })
    }

    /// HTTP status, when the failure carried one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ClientRejected { status, .. } | Self::ServerFailure { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Short message suitable for showing to a patient.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ClientRejected { message, .. } => message.clone(),
            Self::ServerFailure { .. } => {
                "The diagnosis service is having trouble. Please try again shortly.".into()
            }
            Self::NetworkFailure { .. } => {
                "Unable to reach the diagnosis service. Check your connection and try again."
                    .into()
            }
            Self::InvalidResponse(_) => "The diagnosis service sent an unexpected reply.".into(),
            Self::InvalidIntake(e) => e.to_string(),
            Self::Protocol(_) => "Received an unreadable message from the service.".into(),
            Self::ConnectivityExhausted { .. } => {
                "Connection lost. Please start a new diagnosis.".into()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Why `answer()` refused to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No question is waiting for an answer.
    #[error("no open question to answer")]
    NoOpenQuestion,

    /// The duplex link is not open.
    #[error("connection is not open")]
    LinkNotOpen,

    /// The session completed, failed, or was closed.
    #[error("session has finished")]
    SessionFinished,

    /// Blank answer text.
    #[error("answer is empty")]
    EmptyAnswer,
}

// ─────────────────────────────────────────────────────────────────────────────
// IntakeError
// ─────────────────────────────────────────────────────────────────────────────

/// Intake field validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// Name missing.
    #[error("name is required")]
    BlankName,

    /// Age above the accepted maximum.
    #[error("age {0} is out of range (0-120)")]
    AgeOutOfRange(u32),

    /// Symptoms missing.
    #[error("symptoms are required")]
    BlankSymptoms,

    /// Gender not one of male, female, other.
    #[error("unknown gender {0:?} (expected male, female or other)")]
    UnknownGender(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(
            Failure::NetworkFailure {
                message: "refused".into(),
                attempts: 4
            }
            .is_transient()
        );
        assert!(
            Failure::ServerFailure {
                status: 503,
                message: "down".into(),
                attempts: 4
            }
            .is_transient()
        );
        assert!(
            !Failure::ClientRejected {
                status: 422,
                message: "bad age".into()
            }
            .is_transient()
        );
        assert!(!Failure::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn only_exhaustion_is_terminal() {
        assert!(Failure::ConnectivityExhausted { attempts: 5 }.is_terminal());
        assert!(!Failure::Protocol(ProtocolError::Remote("x".into())).is_terminal());
    }

    #[test]
    fn status_accessor() {
        let f = Failure::ClientRejected {
            status: 400,
            message: "m".into(),
        };
        assert_eq!(f.status(), Some(400));
        assert_eq!(Failure::InvalidResponse("x".into()).status(), None);
    }

    #[test]
    fn display_messages() {
        let f = Failure::NetworkFailure {
            message: "connection refused".into(),
            attempts: 4,
        };
        assert_eq!(
            f.to_string(),
            "unable to reach service after 4 attempts: connection refused"
        );
        assert_eq!(
            IntakeError::AgeOutOfRange(150).to_string(),
            "age 150 is out of range (0-120)"
        );
    }

    #[test]
    fn client_rejection_shows_server_message() {
        let f = Failure::ClientRejected {
            status: 422,
            message: "Age must be a number".into(),
        };
        assert_eq!(f.user_message(), "Age must be a number");
    }

    #[test]
    fn intake_error_converts() {
        let f: Failure = IntakeError::BlankName.into();
        assert_eq!(f, Failure::InvalidIntake(IntakeError::BlankName));
    }
}
