//! Transport seam between the link driver and a concrete socket.
//!
//! A [`Connector`] turns a URL into a [`Transport`]: a stream of
//! [`TransportEvent`]s plus a sender for [`Outbound`] messages. The driver
//! never touches the socket directly, so tests substitute an in-memory pair.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, Stream, StreamExt, future};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use super::effect::Outbound;
use super::event::TransportEvent;

/// Failure to establish a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The URL could not be used.
    #[error("invalid endpoint: {0}")]
    InvalidUrl(String),
    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// An established connection.
pub struct Transport {
    /// Inbound events. Ends when the connection is gone.
    pub inbound: BoxStream<'static, TransportEvent>,
    /// Messages for the writer. Dropping it closes the socket.
    pub outbound: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap an event stream and an outbound sender.
    pub fn new<S>(inbound: S, outbound: mpsc::UnboundedSender<Outbound>) -> Self
    where
        S: Stream<Item = TransportEvent> + Send + 'static,
    {
        Self {
            inbound: inbound.boxed(),
            outbound,
        }
    }

    /// A transport wired to a [`MemoryPeer`] instead of a socket.
    pub fn in_memory() -> (Self, MemoryPeer) {
        let (event_tx, event_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self::new(event_rx, out_tx),
            MemoryPeer {
                events: event_tx,
                outbound: out_rx,
            },
        )
    }
}

/// Remote end of an in-memory [`Transport`].
#[derive(Debug)]
pub struct MemoryPeer {
    /// Push events the link will observe.
    pub events: fmpsc::UnboundedSender<TransportEvent>,
    /// Messages the link transmitted.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MemoryPeer {
    /// Deliver a text frame to the link.
    pub fn push_frame(&self, text: impl Into<String>) -> bool {
        self.events
            .unbounded_send(TransportEvent::Frame(text.into()))
            .is_ok()
    }

    /// Deliver a close to the link.
    pub fn push_close(&self, code: Option<u16>) -> bool {
        self.events
            .unbounded_send(TransportEvent::Closed(code))
            .is_ok()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url.to_owned()));
        }
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(url, status = response.status().as_u16(), "websocket handshake complete");

        let (mut sink, stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

        let _writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Outbound::Close { .. });
                if let Err(e) = sink.send(to_message(msg)).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = stream.filter_map(|msg| future::ready(from_message(msg)));
        Ok(Transport::new(inbound, out_tx))
    }
}

fn to_message(msg: Outbound) -> Message {
    match msg {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(vec![].into()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<TransportEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(TransportEvent::Frame(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(TransportEvent::Frame(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Ok(Message::Close(frame)) => Some(TransportEvent::Closed(
            frame.map(|f| u16::from(f.code)),
        )),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
