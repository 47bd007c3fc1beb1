//! Outputs of the link state machine, executed by the driver.

use std::time::Duration;

use super::event::Timer;
use super::state::ConnId;

/// Close code sent on an intentional close.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Close reason sent on an intentional close.
pub const USER_CLOSE_REASON: &str = "User initiated close";

/// A message for the transport writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(String),
    /// Keep-alive ping.
    Ping,
    /// Close frame.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Notices delivered to the owner of the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkNotice {
    /// The link became open (`true`) or stopped being open (`false`).
    Status {
        /// Whether frames can flow.
        open: bool,
    },
    /// An inbound text frame.
    Frame(String),
    /// A reconnect is scheduled.
    Reconnecting {
        /// 1-based reconnect attempt.
        attempt: u32,
        /// Delay before it.
        delay: Duration,
    },
    /// Every reconnect attempt failed. The link is closed.
    ConnectivityExhausted {
        /// Reconnect attempts made.
        attempts: u32,
    },
    /// The link reached `Closed`. Always the last notice.
    Closed,
}

/// Side effects requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEffect {
    /// Start a connection attempt.
    Connect {
        /// Attempt id to tag transport events with.
        conn: ConnId,
    },
    /// Adopt the transport of an established attempt.
    Activate {
        /// Established attempt.
        conn: ConnId,
    },
    /// Arm a timer, replacing any timer of the same kind.
    ArmTimer {
        /// Timer to deliver on expiry.
        timer: Timer,
        /// Time until expiry.
        delay: Duration,
    },
    /// Disarm every timer.
    CancelTimers,
    /// Hand a message to the active transport.
    Transmit(Outbound),
    /// Abandon any in-flight attempt and drop the active transport.
    DropConnection,
    /// Tell the owner.
    Notify(LinkNotice),
}
