//! Connection states.

use std::fmt;

use serde::Serialize;

/// Identifier of one connection attempt. Strictly increasing per link.
pub type ConnId = u64;

/// Externally visible connection state of a [`DuplexLink`](super::DuplexLink).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, `open` not yet called.
    Idle,
    /// Waiting for a transport to be established.
    Connecting,
    /// Transport established; frames flow both ways.
    Open,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Terminal. Reached by `close()` or by exhausting reconnect attempts.
    Closed,
}

impl ConnectionState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Internal state; carries the connection attempt the state belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Connecting { conn: ConnId },
    Open { conn: ConnId },
    Reconnecting,
    Closed,
}

impl Phase {
    pub(crate) fn public(self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Open { .. } => ConnectionState::Open,
            Self::Reconnecting => ConnectionState::Reconnecting,
            Self::Closed => ConnectionState::Closed,
        }
    }

    /// The live connection attempt, if any.
    pub(crate) fn conn(self) -> Option<ConnId> {
        match self {
            Self::Connecting { conn } | Self::Open { conn } => Some(conn),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_serde_agree() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Reconnecting,
            ConnectionState::Closed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn only_closed_is_terminal() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[test]
    fn phase_conn() {
        assert_eq!(Phase::Open { conn: 3 }.conn(), Some(3));
        assert_eq!(Phase::Reconnecting.conn(), None);
    }
}
