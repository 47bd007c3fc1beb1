//! Reconnecting duplex link for one session.
//!
//! [`DuplexLink`] is a handle to a driver task. The driver owns the
//! [`LinkMachine`], the timers, and the live [`Transport`]; it feeds every
//! input through [`LinkMachine::handle`] and executes the returned effects.
//! Link state is never shared or locked: the handle only sends commands and
//! watches the published [`ConnectionState`].
//!
//! The owner learns about the link through [`LinkNotice`]s on the channel
//! returned by [`DuplexLink::new`]. [`LinkNotice::Closed`] is always the last
//! notice, after which the channel ends.

pub mod effect;
pub mod event;
pub mod state;
pub mod transition;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sehat_core::{BackoffPolicy, SessionId};
use sehat_settings::SehatSettings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use effect::{LinkEffect, LinkNotice, NORMAL_CLOSE_CODE, Outbound, USER_CLOSE_REASON};
pub use event::{LinkEvent, Timer, TimerKind, TransportEvent};
pub use state::{ConnId, ConnectionState};
pub use transition::{LinkMachine, LinkTiming};
pub use transport::{Connector, MemoryPeer, Transport, TransportError, WsConnector};

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoint, timers and reconnect policy of a [`DuplexLink`].
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Duplex base URL (`ws://` or `wss://`), without the session path.
    pub endpoint: String,
    /// Connect timeout and heartbeat interval.
    pub timing: LinkTiming,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnect attempt.
    pub reconnect_policy: BackoffPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from_settings(&SehatSettings::default())
    }
}

impl LinkConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &SehatSettings) -> Self {
        Self {
            endpoint: followup_endpoint(&settings.api.base_url, settings.api.ws_url.as_deref()),
            timing: LinkTiming {
                connect_timeout: Duration::from_millis(settings.link.connect_timeout_ms),
                heartbeat_interval: Duration::from_millis(settings.link.heartbeat_interval_ms),
            },
            max_reconnect_attempts: settings.link.max_reconnect_attempts,
            reconnect_policy: settings.link.reconnect_policy(),
        }
    }

    /// Wire URL for a session's follow-up channel.
    #[must_use]
    pub fn url_for(&self, session_id: &SessionId) -> String {
        format!(
            "{}/followup/{}",
            self.endpoint.trim_end_matches('/'),
            session_id
        )
    }
}

/// Duplex base URL: the explicit override when set, else the API base with
/// `http` mapped to `ws` and `https` to `wss`.
#[must_use]
pub fn followup_endpoint(api_base: &str, ws_override: Option<&str>) -> String {
    if let Some(ws) = ws_override.map(str::trim).filter(|s| !s.is_empty()) {
        return ws.trim_end_matches('/').to_owned();
    }
    let base = api_base.trim().trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Open(SessionId),
    Send(String, oneshot::Sender<bool>),
    Close(Option<oneshot::Sender<()>>),
}

enum DriverInput {
    Command(Command),
    Timer(Timer),
    Connected {
        conn: ConnId,
        result: Result<Transport, TransportError>,
    },
    Transport {
        conn: ConnId,
        event: TransportEvent,
    },
}

/// Handle to a reconnecting duplex link. Dropping it closes the link.
pub struct DuplexLink {
    inputs: mpsc::UnboundedSender<DriverInput>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for DuplexLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexLink")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl DuplexLink {
    /// Spawn the driver. Must be called inside a tokio runtime.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkNotice>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            machine: LinkMachine::new(
                config.timing,
                config.max_reconnect_attempts,
                config.reconnect_policy,
            ),
            config,
            connector,
            url: String::new(),
            inputs: input_tx.clone(),
            notices: notice_tx,
            state: state_tx,
            timers: HashMap::new(),
            connecting: None,
            staged: None,
            active: None,
        };
        let _ = tokio::spawn(driver.run(input_rx));

        (
            Self {
                inputs: input_tx,
                state: state_rx,
            },
            notice_rx,
        )
    }

    /// Start connecting for `session_id`. Ignored unless the link is idle.
    pub fn open(&self, session_id: SessionId) {
        let _ = self
            .inputs
            .send(DriverInput::Command(Command::Open(session_id)));
    }

    /// Send a text frame. Returns `false`, without sending, unless open.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let command = Command::Send(text.into(), ack_tx);
        if self.inputs.send(DriverInput::Command(command)).is_err() {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    /// Close intentionally. Idempotent.
    ///
    /// Returns once every timer and any in-flight connect are cancelled.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .inputs
            .send(DriverInput::Command(Command::Close(Some(ack_tx))))
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl Drop for DuplexLink {
    fn drop(&mut self) {
        let _ = self.inputs.send(DriverInput::Command(Command::Close(None)));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct Active {
    conn: ConnId,
    outbound: mpsc::UnboundedSender<Outbound>,
    pump: JoinHandle<()>,
}

struct Driver {
    machine: LinkMachine,
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    url: String,
    inputs: mpsc::UnboundedSender<DriverInput>,
    notices: mpsc::UnboundedSender<LinkNotice>,
    state: watch::Sender<ConnectionState>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    connecting: Option<JoinHandle<()>>,
    /// Transport of an attempt that just reported success, until `Activate`.
    staged: Option<(ConnId, Transport)>,
    active: Option<Active>,
}

impl Driver {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<DriverInput>) {
        while let Some(input) = inputs.recv().await {
            self.step(input);
            if self.machine.state().is_terminal() {
                break;
            }
        }
        self.cancel_timers();
        self.drop_connection();
        debug!(url = %self.url, "link driver stopped");
    }

    fn step(&mut self, input: DriverInput) {
        match input {
            DriverInput::Command(Command::Open(session_id)) => {
                if self.machine.state() == ConnectionState::Idle {
                    self.url = self.config.url_for(&session_id);
                }
                let _ = self.apply(LinkEvent::Open { session_id });
            }
            DriverInput::Command(Command::Send(text, ack)) => {
                let sent = self.apply(LinkEvent::Send(text));
                let _ = ack.send(sent);
            }
            DriverInput::Command(Command::Close(ack)) => {
                let _ = self.apply(LinkEvent::Close);
                self.cancel_timers();
                self.drop_connection();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            DriverInput::Timer(timer) => {
                let _ = self.apply(LinkEvent::TimerFired(timer));
            }
            DriverInput::Connected { conn, result } => {
                let event = match result {
                    Ok(transport) => {
                        self.staged = Some((conn, transport));
                        TransportEvent::Established
                    }
                    Err(e) => TransportEvent::Error(e.to_string()),
                };
                let _ = self.apply(LinkEvent::Transport { conn, event });
                // Not adopted: stale attempt. Dropping it closes the socket.
                self.staged = None;
            }
            DriverInput::Transport { conn, event } => {
                let _ = self.apply(LinkEvent::Transport { conn, event });
            }
        }
        let _ = self.state.send_replace(self.machine.state());
    }

    /// Run one transition; returns whether a text frame reached the writer.
    fn apply(&mut self, event: LinkEvent) -> bool {
        let effects = self.machine.handle(event);
        let mut sent_text = false;
        for effect in effects {
            match effect {
                LinkEffect::Connect { conn } => self.connect(conn),
                LinkEffect::Activate { conn } => self.activate(conn),
                LinkEffect::ArmTimer { timer, delay } => self.arm(timer, delay),
                LinkEffect::CancelTimers => self.cancel_timers(),
                LinkEffect::Transmit(msg) => {
                    let is_text = matches!(msg, Outbound::Text(_));
                    let delivered = self
                        .active
                        .as_ref()
                        .is_some_and(|a| a.outbound.send(msg).is_ok());
                    sent_text |= is_text && delivered;
                }
                LinkEffect::DropConnection => self.drop_connection(),
                LinkEffect::Notify(notice) => {
                    let _ = self.notices.send(notice);
                }
            }
        }
        sent_text
    }

    fn connect(&mut self, conn: ConnId) {
        if let Some(previous) = self.connecting.take() {
            previous.abort();
        }
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let inputs = self.inputs.clone();
        debug!(conn, url = %url, "connecting");
        self.connecting = Some(tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = inputs.send(DriverInput::Connected { conn, result });
        }));
    }

    fn activate(&mut self, conn: ConnId) {
        let Some((staged_conn, transport)) = self.staged.take() else {
            warn!(conn, "no transport staged for activation");
            return;
        };
        if staged_conn != conn {
            warn!(conn, staged_conn, "staged transport belongs to another attempt");
            return;
        }
        let Transport {
            mut inbound,
            outbound,
        } = transport;
        let inputs = self.inputs.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = inbound.next().await {
                let terminal = event.is_terminal();
                if inputs.send(DriverInput::Transport { conn, event }).is_err() || terminal {
                    return;
                }
            }
            let _ = inputs.send(DriverInput::Transport {
                conn,
                event: TransportEvent::Closed(None),
            });
        });
        self.connecting = None;
        self.active = Some(Active {
            conn,
            outbound,
            pump,
        });
    }

    fn arm(&mut self, timer: Timer, delay: Duration) {
        let inputs = self.inputs.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(DriverInput::Timer(timer));
        });
        if let Some(previous) = self.timers.insert(timer.kind, handle) {
            previous.abort();
        }
    }

    fn cancel_timers(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    fn drop_connection(&mut self) {
        if let Some(connecting) = self.connecting.take() {
            connecting.abort();
        }
        if let Some(active) = self.active.take() {
            debug!(conn = active.conn, "dropping connection");
            active.pump.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::testing::{Attempt, ScriptedConnector, fast_config};
    use super::*;
    use tokio::time::{Instant, timeout};

    const WAIT: Duration = Duration::from_secs(120);

    async fn next_notice(rx: &mut mpsc::UnboundedReceiver<LinkNotice>) -> LinkNotice {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn endpoint_maps_scheme() {
        assert_eq!(followup_endpoint("http://h:8000/", None), "ws://h:8000");
        assert_eq!(followup_endpoint("https://h", None), "wss://h");
        assert_eq!(
            followup_endpoint("https://h", Some("wss://other/")),
            "wss://other"
        );
        assert_eq!(followup_endpoint("http://h", Some("  ")), "ws://h");
    }

    #[test]
    fn url_for_appends_followup_path() {
        let config = fast_config(3);
        assert_eq!(
            config.url_for(&SessionId::from("s1")),
            "ws://diag.test/followup/s1"
        );
    }

    #[test]
    fn config_from_default_settings() {
        let config = LinkConfig::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8000");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.timing.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.timing.heartbeat_interval, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn open_exchange_frames() {
        let (connector, mut peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        assert_eq!(link.state(), ConnectionState::Idle);

        link.open(SessionId::from("s1"));
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: true });
        assert_eq!(link.state(), ConnectionState::Open);
        assert_eq!(connector.urls(), vec!["ws://diag.test/followup/s1".to_owned()]);

        let mut peer = peers.recv().await.unwrap();
        assert!(link.send("{\"answer\":\"B\"}").await);
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Text("{\"answer\":\"B\"}".into()))
        );

        assert!(peer.push_frame("{\"question\":\"q\"}"));
        assert_eq!(
            next_notice(&mut notices).await,
            LinkNotice::Frame("{\"question\":\"q\"}".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sends_ping_while_open() {
        let (connector, mut peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector, fast_config(3));
        link.open(SessionId::from("s1"));
        let _ = next_notice(&mut notices).await;
        let mut peer = peers.recv().await.unwrap();

        let start = Instant::now();
        assert_eq!(
            timeout(WAIT, peer.outbound.recv()).await.unwrap(),
            Some(Outbound::Ping)
        );
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(link.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_noop_unless_open() {
        let (connector, _peers) = ScriptedConnector::new([Attempt::Hang]);
        let (link, _notices) = DuplexLink::new(connector, fast_config(3));
        assert!(!link.send("early").await);
        link.open(SessionId::from("s1"));
        assert!(!link.send("connecting").await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_then_exhausted() {
        let (connector, mut peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        link.open(SessionId::from("s1"));
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: true });

        let peer = peers.recv().await.unwrap();
        let start = Instant::now();
        assert!(peer.push_close(Some(1006)));

        let mut seen = Vec::new();
        loop {
            let notice = next_notice(&mut notices).await;
            let done = notice == LinkNotice::Closed;
            seen.push(notice);
            if done {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                LinkNotice::Status { open: false },
                LinkNotice::Reconnecting { attempt: 1, delay: Duration::from_millis(1000) },
                LinkNotice::Reconnecting { attempt: 2, delay: Duration::from_millis(2000) },
                LinkNotice::Reconnecting { attempt: 3, delay: Duration::from_millis(4000) },
                LinkNotice::ConnectivityExhausted { attempts: 3 },
                LinkNotice::Closed,
            ]
        );
        assert!(start.elapsed() >= Duration::from_millis(7000));
        assert_eq!(connector.urls().len(), 4);
        assert_eq!(link.state(), ConnectionState::Closed);
        assert!(timeout(WAIT, notices.recv()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_triggers_reconnect() {
        let (connector, _peers) = ScriptedConnector::new([Attempt::Hang, Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        let start = Instant::now();
        link.open(SessionId::from("s1"));

        assert_eq!(
            next_notice(&mut notices).await,
            LinkNotice::Reconnecting { attempt: 1, delay: Duration::from_millis(1000) }
        );
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: true });
        assert!(start.elapsed() >= Duration::from_secs(11));
        assert_eq!(connector.urls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_reconnects_and_resets_attempts() {
        let (connector, mut peers) =
            ScriptedConnector::new([Attempt::Accept, Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector, fast_config(3));
        link.open(SessionId::from("s1"));
        let _ = next_notice(&mut notices).await;

        let first = peers.recv().await.unwrap();
        assert!(first.push_close(Some(1000)));
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: false });
        assert_eq!(
            next_notice(&mut notices).await,
            LinkNotice::Reconnecting { attempt: 1, delay: Duration::from_millis(1000) }
        );
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: true });

        // Events from the first connection no longer count.
        let _ = first.push_frame("stale");
        let second = peers.recv().await.unwrap();
        assert!(second.push_frame("fresh"));
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Frame("fresh".into()));
        assert!(link.send("x").await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_sends_close_frame_and_is_idempotent() {
        let (connector, mut peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        link.open(SessionId::from("s1"));
        let _ = next_notice(&mut notices).await;
        let mut peer = peers.recv().await.unwrap();

        link.close().await;
        assert_eq!(link.state(), ConnectionState::Closed);
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Close {
                code: NORMAL_CLOSE_CODE,
                reason: USER_CLOSE_REASON.into()
            })
        );
        assert_eq!(peer.outbound.recv().await, None);

        link.close().await;
        assert!(!link.send("after").await);
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: false });
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Closed);
        assert!(notices.recv().await.is_none());

        // No reconnect even if the transport reports late.
        let _ = peer.push_close(Some(1006));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_open() {
        let (connector, _peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        link.close().await;
        assert_eq!(link.state(), ConnectionState::Closed);
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Closed);

        link.open(SessionId::from("s1"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(connector.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_reconnecting_cancels_attempt() {
        let (connector, _peers) = ScriptedConnector::new([Attempt::Refuse]);
        let (link, mut notices) = DuplexLink::new(connector.clone(), fast_config(3));
        link.open(SessionId::from("s1"));
        assert_matches::assert_matches!(
            next_notice(&mut notices).await,
            LinkNotice::Reconnecting { attempt: 1, .. }
        );

        link.close().await;
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Closed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_closes_link() {
        let (connector, mut peers) = ScriptedConnector::new([Attempt::Accept]);
        let (link, mut notices) = DuplexLink::new(connector, fast_config(3));
        link.open(SessionId::from("s1"));
        let _ = next_notice(&mut notices).await;
        let mut peer = peers.recv().await.unwrap();

        drop(link);
        assert_matches::assert_matches!(peer.outbound.recv().await, Some(Outbound::Close { .. }));
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Status { open: false });
        assert_eq!(next_notice(&mut notices).await, LinkNotice::Closed);
    }
}
