//! Tick-driven client for Pinus/Pomelo game servers.
//!
//! The caller owns the loop: open a session with [`Client::connect`], then call
//! [`Client::tick`] with the elapsed seconds. Handshake, heartbeats, response
//! correlation and push routing all happen inside `tick`.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod request_id;
pub mod status;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, HandshakeSettings, LimitSettings, RequestSettings, TransportSettings};
pub use dispatcher::{EventDispatcher, PushCallback, ResponseCallback};
pub use error::{ClientError, CloseReason, RequestError, Result};
pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor};
pub use request_id::{DEFAULT_REQUEST_ID_CEILING, RequestIdAllocator};
pub use status::NetworkStatus;
pub use transport::{
    TcpParameter, TcpTransport, Transport, TransportError, TransportEvent, TransportKind,
    TransportParameter, WebSocketParameter, WebSocketTransport, create_transport,
};

pub use pinus_protocol as protocol;
