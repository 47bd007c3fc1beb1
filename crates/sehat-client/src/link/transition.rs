//! The link transition function.
//!
//! [`LinkMachine::handle`] is the only place the connection state changes.
//! It performs no I/O: it returns [`LinkEffect`]s for the driver to execute.
//!
//! ```text
//!   Idle ──open──▶ Connecting ──established──▶ Open
//!                    ▲    │                      │
//!         reconnect  │    │ error/close/timeout  │ error/close
//!           due      │    ▼                      ▼
//!                  Reconnecting ◀────────────────┘
//!                         │ attempts exhausted
//!                         ▼
//!   (any) ──close()──▶ Closed
//! ```
//!
//! Two counters keep late inputs harmless:
//! - every connection attempt gets a fresh [`ConnId`]; transport events for
//!   any other attempt are dropped
//! - every phase change bumps the generation; timers armed in an older
//!   generation are dropped

use std::time::Duration;

use sehat_core::{BackoffPolicy, RetryBudget, SessionId};
use tracing::{debug, error, info, warn};

use super::effect::{LinkEffect, LinkNotice, NORMAL_CLOSE_CODE, Outbound, USER_CLOSE_REASON};
use super::event::{LinkEvent, Timer, TimerKind, TransportEvent};
use super::state::{ConnId, ConnectionState, Phase};

/// Timer durations used by the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkTiming {
    /// Limit for establishing one connection.
    pub connect_timeout: Duration,
    /// Keep-alive interval while open.
    pub heartbeat_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Finite-state object owning the connection state of one link.
#[derive(Clone, Debug)]
pub struct LinkMachine {
    phase: Phase,
    generation: u64,
    next_conn: ConnId,
    reconnects: RetryBudget,
    timing: LinkTiming,
    session_id: Option<SessionId>,
}

impl LinkMachine {
    /// Machine in `Idle`.
    #[must_use]
    pub fn new(timing: LinkTiming, max_reconnect_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            next_conn: 1,
            reconnects: RetryBudget::new(max_reconnect_attempts, backoff),
            timing,
            session_id: None,
        }
    }

    /// Current public state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.phase.public()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reconnect attempts used since the link was last open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnects.attempt()
    }

    /// Feed one event; returns the effects to execute, in order.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkEffect> {
        let mut fx = Vec::new();
        match (self.phase, event) {
            (Phase::Closed, event) => {
                debug!(session_id = self.session(), ?event, "link closed, ignoring event");
            }
            (_, LinkEvent::Close) => self.close(&mut fx),
            (Phase::Idle, LinkEvent::Open { session_id }) => {
                info!(session_id = %session_id, "opening link");
                self.session_id = Some(session_id);
                self.begin_attempt(&mut fx);
            }
            (_, LinkEvent::Open { session_id }) => {
                warn!(session_id = %session_id, state = %self.state(), "link already opened, ignoring open");
            }
            (Phase::Open { .. }, LinkEvent::Send(text)) => {
                fx.push(LinkEffect::Transmit(Outbound::Text(text)));
            }
            (_, LinkEvent::Send(_)) => {
                debug!(session_id = self.session(), state = %self.state(), "link not open, dropping send");
            }
            (phase, LinkEvent::TimerFired(timer)) => self.on_timer(phase, timer, &mut fx),
            (phase, LinkEvent::Transport { conn, event }) => {
                if phase.conn() == Some(conn) {
                    self.on_transport(phase, conn, event, &mut fx);
                } else {
                    debug!(session_id = self.session(), conn, ?event, "dropping event from stale connection");
                }
            }
        }
        fx
    }

    fn session(&self) -> &str {
        self.session_id.as_ref().map_or("-", SessionId::as_str)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(
            session_id = self.session(),
            from = %self.phase.public(),
            to = %phase.public(),
            generation = self.generation + 1,
            "link transition"
        );
        self.phase = phase;
        self.generation += 1;
    }

    fn arm(&self, kind: TimerKind, delay: Duration, fx: &mut Vec<LinkEffect>) {
        fx.push(LinkEffect::ArmTimer {
            timer: Timer {
                kind,
                generation: self.generation,
            },
            delay,
        });
    }

    fn begin_attempt(&mut self, fx: &mut Vec<LinkEffect>) {
        let conn = self.next_conn;
        self.next_conn += 1;
        self.enter(Phase::Connecting { conn });
        fx.push(LinkEffect::Connect { conn });
        self.arm(TimerKind::ConnectTimeout, self.timing.connect_timeout, fx);
    }

    fn on_timer(&mut self, phase: Phase, timer: Timer, fx: &mut Vec<LinkEffect>) {
        if timer.generation != self.generation {
            debug!(session_id = self.session(), ?timer, current = self.generation, "dropping stale timer");
            return;
        }
        match (phase, timer.kind) {
            (Phase::Connecting { conn }, TimerKind::ConnectTimeout) => {
                warn!(session_id = self.session(), conn, "connect timed out");
                self.fail(fx);
            }
            (Phase::Open { .. }, TimerKind::Heartbeat) => {
                fx.push(LinkEffect::Transmit(Outbound::Ping));
                self.arm(TimerKind::Heartbeat, self.timing.heartbeat_interval, fx);
            }
            (Phase::Reconnecting, TimerKind::ReconnectDue) => self.begin_attempt(fx),
            (phase, kind) => {
                debug!(session_id = self.session(), ?phase, ?kind, "timer does not apply, ignoring");
            }
        }
    }

    fn on_transport(
        &mut self,
        phase: Phase,
        conn: ConnId,
        event: TransportEvent,
        fx: &mut Vec<LinkEffect>,
    ) {
        match (phase, event) {
            (Phase::Connecting { .. }, TransportEvent::Established) => {
                self.reconnects.reset();
                self.enter(Phase::Open { conn });
                info!(session_id = self.session(), conn, "link open");
                fx.push(LinkEffect::CancelTimers);
                fx.push(LinkEffect::Activate { conn });
                self.arm(TimerKind::Heartbeat, self.timing.heartbeat_interval, fx);
                fx.push(LinkEffect::Notify(LinkNotice::Status { open: true }));
            }
            (Phase::Connecting { .. }, TransportEvent::Error(reason)) => {
                warn!(session_id = self.session(), conn, reason = %reason, "connect failed");
                self.fail(fx);
            }
            (Phase::Connecting { .. }, TransportEvent::Closed(code)) => {
                warn!(session_id = self.session(), conn, ?code, "closed while connecting");
                self.fail(fx);
            }
            (Phase::Open { .. }, TransportEvent::Frame(text)) => {
                debug!(session_id = self.session(), conn, len = text.len(), "frame received");
                fx.push(LinkEffect::Notify(LinkNotice::Frame(text)));
            }
            (Phase::Open { .. }, event) if event.is_terminal() => {
                warn!(session_id = self.session(), conn, ?event, "link lost");
                fx.push(LinkEffect::Notify(LinkNotice::Status { open: false }));
                self.fail(fx);
            }
            (phase, event) => {
                debug!(session_id = self.session(), conn, ?phase, ?event, "transport event does not apply");
            }
        }
    }

    /// An attempt failed: schedule the next one or give up.
    fn fail(&mut self, fx: &mut Vec<LinkEffect>) {
        fx.push(LinkEffect::CancelTimers);
        fx.push(LinkEffect::DropConnection);

        if let Some(delay) = self.reconnects.next_delay() {
            let attempt = self.reconnects.attempt();
            self.enter(Phase::Reconnecting);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            warn!(session_id = self.session(), attempt, delay_ms, "reconnect scheduled");
            self.arm(TimerKind::ReconnectDue, delay, fx);
            fx.push(LinkEffect::Notify(LinkNotice::Reconnecting { attempt, delay }));
        } else {
            let attempts = self.reconnects.attempt();
            self.enter(Phase::Closed);
            error!(session_id = self.session(), attempts, "reconnect attempts exhausted");
            fx.push(LinkEffect::Notify(LinkNotice::ConnectivityExhausted { attempts }));
            fx.push(LinkEffect::Notify(LinkNotice::Closed));
        }
    }

    fn close(&mut self, fx: &mut Vec<LinkEffect>) {
        let was_open = matches!(self.phase, Phase::Open { .. });
        fx.push(LinkEffect::CancelTimers);
        if was_open {
            fx.push(LinkEffect::Transmit(Outbound::Close {
                code: NORMAL_CLOSE_CODE,
                reason: USER_CLOSE_REASON.to_owned(),
            }));
        }
        fx.push(LinkEffect::DropConnection);
        self.enter(Phase::Closed);
        info!(session_id = self.session(), "link closed by owner");
        if was_open {
            fx.push(LinkEffect::Notify(LinkNotice::Status { open: false }));
        }
        fx.push(LinkEffect::Notify(LinkNotice::Closed));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
