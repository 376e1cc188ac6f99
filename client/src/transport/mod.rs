//! Byte pipes between the session and the server.
//!
//! The session is synchronous and tick-driven, so a transport only has to
//! queue outbound bytes and hand back whatever arrived since the last `poll`.
//! The shipped transports run their socket I/O on a tokio task and talk to the
//! session through a pair of channels.

pub mod tcp;
pub mod websocket;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use pinus_protocol::FrameLimits;

use crate::config::TransportSettings;

pub use tcp::{TcpParameter, TcpTransport};
pub use websocket::{WebSocketParameter, WebSocketTransport};

/// Capacity of the channels between a transport handle and its I/O task.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

impl TransportKind {
    /// Default `type` announced in the handshake hello.
    pub fn client_type(self) -> &'static str {
        match self {
            Self::Tcp => "rust-tcp",
            Self::WebSocket => "rust-websocket",
        }
    }
}

/// What a transport observed since the previous `poll`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// Raw bytes; may hold one frame, several back-to-back frames, or garbage.
    Received(Vec<u8>),
    Closed(Option<String>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport is closed")]
    Closed,

    #[error("outbound queue is full")]
    QueueFull,
}

/// A non-blocking, pollable connection.
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Queues one encoded frame. Fails unless the transport reported `Connected`.
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Drains pending events without blocking.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Starts a graceful close. No further events are expected afterwards.
    fn disconnect(&mut self);
}

/// Where to connect, tagged by transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportParameter {
    Tcp(TcpParameter),
    WebSocket(WebSocketParameter),
}

impl TransportParameter {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::WebSocket(_) => TransportKind::WebSocket,
        }
    }
}

impl core::fmt::Display for TransportParameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Tcp(tcp) => write!(f, "tcp://{}:{}", tcp.host, tcp.port),
            Self::WebSocket(ws) => f.write_str(&ws.url),
        }
    }
}

/// Builds the transport matching `parameter` and starts connecting on `handle`.
pub fn create_transport(
    parameter: &TransportParameter,
    settings: &TransportSettings,
    limits: FrameLimits,
    handle: &Handle,
) -> Box<dyn Transport> {
    match parameter {
        TransportParameter::Tcp(tcp) => {
            Box::new(TcpTransport::spawn(tcp.clone(), settings, limits, handle))
        }
        TransportParameter::WebSocket(ws) => {
            Box::new(WebSocketTransport::spawn(ws.clone(), settings, handle))
        }
    }
}

/// Sent from a transport handle to its I/O task.
#[derive(Debug)]
pub(crate) enum IoCommand {
    Frame(Vec<u8>),
    Close,
}

/// Task side of the channel pair.
pub(crate) struct IoChannels {
    pub commands: mpsc::Receiver<IoCommand>,
    pub events: mpsc::Sender<TransportEvent>,
}

/// Handle side of the channel pair, shared by both socket transports.
#[derive(Debug)]
pub(crate) struct ChannelBridge {
    commands: mpsc::Sender<IoCommand>,
    events: mpsc::Receiver<TransportEvent>,
    connected: bool,
    closed: bool,
}

impl ChannelBridge {
    pub fn new() -> (Self, IoChannels) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let bridge = Self {
            commands: command_tx,
            events: event_rx,
            connected: false,
            closed: false,
        };
        let channels = IoChannels {
            commands: command_rx,
            events: event_tx,
        };
        (bridge, channels)
    }

    pub fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        self.commands
            .try_send(IoCommand::Frame(bytes))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    pub fn poll(&mut self) -> Vec<TransportEvent> {
        let mut drained = Vec::new();
        if self.closed {
            return drained;
        }

        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    match &event {
                        TransportEvent::Connected => self.connected = true,
                        TransportEvent::Closed(_) => {
                            self.connected = false;
                            self.closed = true;
                        }
                        TransportEvent::Received(_) => {}
                    }
                    drained.push(event);
                    if self.closed {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    self.closed = true;
                    drained.push(TransportEvent::Closed(Some("I/O task ended".to_string())));
                    break;
                }
            }
        }
        drained
    }

    pub fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.connected = false;
        self.closed = true;
        // A full queue means the task is stuck; dropping the sender ends it anyway.
        let _ = self.commands.try_send(IoCommand::Close);
    }
}
