use pinus_protocol::{FrameError, HandshakeError, MessageError};

use crate::status::NetworkStatus;
use crate::transport::TransportError;

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect` was called.
    Requested,
    /// A new `connect` replaced the session.
    Replaced,
    /// The server sent a kick frame, with its reason if one was given.
    Kicked(Option<String>),
    /// Heartbeat timeout: nothing heard from the server in time.
    LivenessLost,
    HandshakeRejected(String),
    /// Framing lost sync; the byte stream cannot be trusted anymore.
    MalformedFrame(String),
    /// The transport failed to connect or dropped.
    TransportClosed(Option<String>),
}

impl CloseReason {
    /// Whether the close was caused by a failure rather than an explicit decision.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Requested | Self::Replaced | Self::Kicked(_))
    }
}

impl core::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::Replaced => write!(f, "replaced by a new connection"),
            Self::Kicked(Some(reason)) => write!(f, "kicked by server: {reason}"),
            Self::Kicked(None) => write!(f, "kicked by server"),
            Self::LivenessLost => write!(f, "heartbeat timeout"),
            Self::HandshakeRejected(detail) => write!(f, "handshake rejected: {detail}"),
            Self::MalformedFrame(detail) => write!(f, "malformed frame: {detail}"),
            Self::TransportClosed(Some(detail)) => write!(f, "transport closed: {detail}"),
            Self::TransportClosed(None) => write!(f, "transport closed"),
        }
    }
}

/// Delivered to a pending request callback instead of a response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("connection closed before the response arrived ({0})")]
    ConnectionClosed(CloseReason),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not ready (status: {0})")]
    NotReady(NetworkStatus),

    #[error("all {0} request ids are waiting for responses")]
    TooManyPendingRequests(u32),

    #[error("no tokio runtime available to drive the transport")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
