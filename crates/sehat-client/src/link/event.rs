//! Inputs to the link state machine.

use sehat_core::SessionId;

use super::state::ConnId;

/// What a transport reported about one connection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished.
    Established,
    /// One inbound text frame.
    Frame(String),
    /// The peer closed, with its close code when one was sent.
    Closed(Option<u16>),
    /// The transport failed.
    Error(String),
}

impl TransportEvent {
    /// Whether the connection is gone after this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Error(_))
    }
}

/// Timer slots. At most one timer per kind is armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Connection must be established before this fires.
    ConnectTimeout,
    /// Keep-alive tick while open.
    Heartbeat,
    /// Backoff delay before the next connection attempt.
    ReconnectDue,
}

/// A timer tagged with the generation it was armed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timer {
    /// Slot.
    pub kind: TimerKind,
    /// Machine generation when armed. Stale timers are ignored.
    pub generation: u64,
}

/// The single event type consumed by the transition function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Owner asked to open the link for a session.
    Open {
        /// Session the channel is scoped to.
        session_id: SessionId,
    },
    /// Transport report for a connection attempt.
    Transport {
        /// Attempt the report belongs to.
        conn: ConnId,
        /// What happened.
        event: TransportEvent,
    },
    /// A timer expired.
    TimerFired(Timer),
    /// Owner wants to send a text frame.
    Send(String),
    /// Owner closes the link intentionally.
    Close,
}
