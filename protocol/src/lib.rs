//! Wire layer of the Pinus/Pomelo client protocol.
//!
//! Three codecs, no I/O: [`FrameCodec`] cuts packages out of transport bytes,
//! [`MessageCodec`] reads and writes the request/response/push messages carried
//! by data packages, and [`HandshakeNegotiator`] builds the hello and validates
//! the server's session parameters.

pub mod frame;
pub mod handshake;
pub mod message;

pub use frame::{
    FRAME_HEADER_LEN, Frame, FrameCodec, FrameError, FrameKind, FrameLimits, MAX_FRAME_BODY_LEN,
};
pub use handshake::{
    CODE_FAIL, CODE_OK, CODE_OLD_CLIENT, DEFAULT_CLIENT_TYPE, HANDSHAKE_VERSION, HandshakeError,
    HandshakeNegotiator, HandshakeOutcome, HeartbeatConfig, ProtoTables,
};
pub use message::{Message, MessageCodec, MessageError, MessageKind, RouteDictionary};

/// Returns the protocol crate version string.
pub fn protocol_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
