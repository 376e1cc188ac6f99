//! Package framing: one kind byte followed by a 3-byte big-endian body length.

const KIND_LEN: usize = 1;
const LENGTH_LEN: usize = 3;

/// Number of bytes in the frame header.
pub const FRAME_HEADER_LEN: usize = KIND_LEN + LENGTH_LEN;

/// Largest body the 3-byte length field can describe.
pub const MAX_FRAME_BODY_LEN: usize = (1 << 24) - 1;

/// Package kinds understood by the protocol.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Client hello / server handshake response (JSON body).
    Handshake = 1,
    /// Client confirmation that the handshake response was accepted.
    HandshakeAck = 2,
    /// Liveness signal, empty body.
    Heartbeat = 3,
    /// Carries one encoded [`crate::Message`].
    Data = 4,
    /// Server-initiated session termination.
    Kick = 5,
}

impl core::convert::TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Handshake),
            2 => Ok(Self::HandshakeAck),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::Data),
            5 => Ok(Self::Kick),
            _ => Err(FrameError::UnknownKind(value)),
        }
    }
}

/// A decoded package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub body: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(kind: FrameKind, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// A frame with no body (handshake ack, heartbeat).
    #[must_use]
    pub fn empty(kind: FrameKind) -> Self {
        Self {
            kind,
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Structural violations found while framing untrusted bytes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than its 4-byte header: got {actual} bytes")]
    Truncated { actual: usize },

    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("frame body length mismatch: declared {declared}, available {available}")]
    LengthMismatch { declared: usize, available: usize },

    #[error("frame body exceeds limit: limit={limit} actual={actual}")]
    BodyTooLarge { limit: usize, actual: usize },
}

/// Limits applied to bodies in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_body_len: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_body_len: MAX_FRAME_BODY_LEN,
        }
    }
}

/// Encodes and decodes packages. Carries no protocol state.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameCodec {
    limits: FrameLimits,
}

impl FrameCodec {
    /// Builds a codec; limits above the wire maximum are clamped to it.
    #[must_use]
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits: FrameLimits {
                max_body_len: limits.max_body_len.min(MAX_FRAME_BODY_LEN),
            },
        }
    }

    #[must_use]
    pub const fn limits(&self) -> FrameLimits {
        self.limits
    }

    /// Encodes one frame.
    ///
    /// Frame format:
    /// - byte 0: kind
    /// - bytes 1..4: body length (BE u24)
    /// - remaining bytes: body
    pub fn encode(&self, kind: FrameKind, body: &[u8]) -> Result<Vec<u8>, FrameError> {
        self.check_body_len(body.len())?;

        let len = body.len();
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + len);
        frame.push(kind as u8);
        frame.push(((len >> 16) & 0xff) as u8);
        frame.push(((len >> 8) & 0xff) as u8);
        frame.push((len & 0xff) as u8);
        frame.extend_from_slice(body);
        Ok(frame)
    }

    /// Decodes exactly one frame; trailing or missing bytes are an error.
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        let (kind, declared) = self.read_header(bytes)?;
        let available = bytes.len() - FRAME_HEADER_LEN;
        if declared != available {
            return Err(FrameError::LengthMismatch {
                declared,
                available,
            });
        }

        Ok(Frame {
            kind,
            body: bytes[FRAME_HEADER_LEN..].to_vec(),
        })
    }

    /// Decodes every frame packed back to back in `bytes`.
    ///
    /// Servers may batch several packages into one transport message. The
    /// whole buffer must be consumed; a dangling partial frame is an error.
    pub fn decode_all(&self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            let (kind, declared) = self.read_header(rest)?;
            let end = FRAME_HEADER_LEN + declared;
            if rest.len() < end {
                return Err(FrameError::LengthMismatch {
                    declared,
                    available: rest.len() - FRAME_HEADER_LEN,
                });
            }

            frames.push(Frame {
                kind,
                body: rest[FRAME_HEADER_LEN..end].to_vec(),
            });
            offset += end;
        }

        if frames.is_empty() {
            return Err(FrameError::Truncated { actual: 0 });
        }
        Ok(frames)
    }

    /// Returns the total size of the frame at the start of `buffer`.
    ///
    /// Returns `Ok(None)` while the header itself is incomplete. The header
    /// is validated as soon as it is available.
    pub fn peek_frame_len(&self, buffer: &[u8]) -> Result<Option<usize>, FrameError> {
        if buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let (_, declared) = self.read_header(buffer)?;
        Ok(Some(FRAME_HEADER_LEN + declared))
    }

    /// Attempts to decode a single frame from the beginning of a stream buffer.
    ///
    /// Returns `Ok(None)` when there are not enough bytes yet, otherwise the
    /// frame and the number of bytes it occupied.
    pub fn try_decode_stream(&self, buffer: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(total_len) = self.peek_frame_len(buffer)? else {
            return Ok(None);
        };
        if buffer.len() < total_len {
            return Ok(None);
        }

        let frame = self.decode(&buffer[..total_len])?;
        Ok(Some((frame, total_len)))
    }

    fn read_header(&self, bytes: &[u8]) -> Result<(FrameKind, usize), FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                actual: bytes.len(),
            });
        }

        let kind = FrameKind::try_from(bytes[0])?;
        let declared =
            (usize::from(bytes[1]) << 16) | (usize::from(bytes[2]) << 8) | usize::from(bytes[3]);
        self.check_body_len(declared)?;
        Ok((kind, declared))
    }

    fn check_body_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.limits.max_body_len {
            return Err(FrameError::BodyTooLarge {
                limit: self.limits.max_body_len,
                actual: len,
            });
        }
        Ok(())
    }
}
