//! Data-frame message layer: request/notify/response/push with route compression.

use std::collections::HashMap;

use serde_json::Value;

const ROUTE_COMPRESSED_FLAG: u8 = 0x01;
const KIND_MASK: u8 = 0x07;
const KIND_SHIFT: u8 = 1;
/// Flag bits this codec understands; anything else (e.g. gzip) is rejected.
const KNOWN_FLAG_BITS: u8 = ROUTE_COMPRESSED_FLAG | (KIND_MASK << KIND_SHIFT);

const ROUTE_CODE_LEN: usize = 2;
const MAX_RAW_ROUTE_LEN: usize = u8::MAX as usize;
const MAX_VARINT_LEN: usize = 5;

/// Logical message kinds carried inside a data frame.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request = 0,
    /// One-way request, no response expected.
    Notify = 1,
    Response = 2,
    Push = 3,
}

impl MessageKind {
    /// Whether a correlation id is written on the wire.
    #[must_use]
    pub const fn has_id(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Whether a route is written on the wire.
    #[must_use]
    pub const fn has_route(self) -> bool {
        matches!(self, Self::Request | Self::Notify | Self::Push)
    }
}

impl core::convert::TryFrom<u8> for MessageKind {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Notify),
            2 => Ok(Self::Response),
            3 => Ok(Self::Push),
            _ => Err(MessageError::UnknownKind(value)),
        }
    }
}

/// One logical protocol unit.
///
/// `id` is 0 for notify and push messages. Responses carry no route on the
/// wire, so a decoded response has an empty `route`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub id: u32,
    pub route: String,
    pub body: Value,
}

impl Message {
    #[must_use]
    pub fn request(id: u32, route: impl Into<String>, body: Value) -> Self {
        Self {
            kind: MessageKind::Request,
            id,
            route: route.into(),
            body,
        }
    }

    #[must_use]
    pub fn notify(route: impl Into<String>, body: Value) -> Self {
        Self {
            kind: MessageKind::Notify,
            id: 0,
            route: route.into(),
            body,
        }
    }

    #[must_use]
    pub fn response(id: u32, body: Value) -> Self {
        Self {
            kind: MessageKind::Response,
            id,
            route: String::new(),
            body,
        }
    }

    #[must_use]
    pub fn push(route: impl Into<String>, body: Value) -> Self {
        Self {
            kind: MessageKind::Push,
            id: 0,
            route: route.into(),
            body,
        }
    }
}

/// Errors produced while encoding/decoding a data-frame body.
#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("unsupported message flags {0:#04x}")]
    UnsupportedFlags(u8),

    #[error("message truncated while reading {0}")]
    Truncated(&'static str),

    #[error("message id does not fit in 32 bits")]
    IdOverflow,

    #[error("{0:?} message requires a non-zero id")]
    MissingId(MessageKind),

    #[error("{0:?} message requires a route")]
    MissingRoute(MessageKind),

    #[error("route too long: {0} bytes (max 255)")]
    RouteTooLong(usize),

    #[error("route is not valid UTF-8")]
    InvalidRoute,

    #[error("route code {0} is not in the route dictionary")]
    UnknownRouteCode(u16),

    #[error("invalid JSON body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Server-issued route compression table for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDictionary {
    codes: HashMap<String, u16>,
    routes: HashMap<u16, String>,
}

impl RouteDictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from `(route, code)` pairs. Later pairs win.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        let mut dictionary = Self::default();
        for (route, code) in entries {
            let route = route.into();
            if let Some(previous) = dictionary.codes.insert(route.clone(), code) {
                dictionary.routes.remove(&previous);
            }
            if let Some(previous) = dictionary.routes.insert(code, route) {
                if dictionary.codes.get(&previous) == Some(&code) {
                    dictionary.codes.remove(&previous);
                }
            }
        }
        dictionary
    }

    #[must_use]
    pub fn code_of(&self, route: &str) -> Option<u16> {
        self.codes.get(route).copied()
    }

    #[must_use]
    pub fn route_of(&self, code: u16) -> Option<&str> {
        self.routes.get(&code).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Encodes and decodes data-frame bodies against one route dictionary.
#[derive(Clone, Debug, Default)]
pub struct MessageCodec {
    dictionary: RouteDictionary,
}

impl MessageCodec {
    #[must_use]
    pub fn new(dictionary: RouteDictionary) -> Self {
        Self { dictionary }
    }

    #[must_use]
    pub fn dictionary(&self) -> &RouteDictionary {
        &self.dictionary
    }

    /// Encodes an outbound client message. `id == 0` produces a notify.
    pub fn encode(&self, route: &str, id: u32, payload: &Value) -> Result<Vec<u8>, MessageError> {
        let kind = if id == 0 {
            MessageKind::Notify
        } else {
            MessageKind::Request
        };
        self.encode_parts(kind, id, route, payload)
    }

    /// Encodes a message of any kind.
    pub fn encode_message(&self, message: &Message) -> Result<Vec<u8>, MessageError> {
        self.encode_parts(message.kind, message.id, &message.route, &message.body)
    }

    fn encode_parts(
        &self,
        kind: MessageKind,
        id: u32,
        route: &str,
        body: &Value,
    ) -> Result<Vec<u8>, MessageError> {
        if kind.has_id() && id == 0 {
            return Err(MessageError::MissingId(kind));
        }
        if kind.has_route() && route.is_empty() {
            return Err(MessageError::MissingRoute(kind));
        }

        let code = if kind.has_route() {
            self.dictionary.code_of(route)
        } else {
            None
        };
        if kind.has_route() && code.is_none() && route.len() > MAX_RAW_ROUTE_LEN {
            return Err(MessageError::RouteTooLong(route.len()));
        }

        let body = serde_json::to_vec(body)?;
        let mut out = Vec::with_capacity(1 + MAX_VARINT_LEN + 1 + route.len() + body.len());

        let mut flag = (kind as u8) << KIND_SHIFT;
        if code.is_some() {
            flag |= ROUTE_COMPRESSED_FLAG;
        }
        out.push(flag);

        if kind.has_id() {
            write_varint(&mut out, id);
        }

        if kind.has_route() {
            match code {
                Some(code) => out.extend_from_slice(&code.to_be_bytes()),
                None => {
                    out.push(route.len() as u8);
                    out.extend_from_slice(route.as_bytes());
                }
            }
        }

        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a data-frame body.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, MessageError> {
        let (&flag, mut rest) = bytes.split_first().ok_or(MessageError::Empty)?;
        if flag & !KNOWN_FLAG_BITS != 0 {
            return Err(MessageError::UnsupportedFlags(flag));
        }

        let kind = MessageKind::try_from((flag >> KIND_SHIFT) & KIND_MASK)?;
        let compressed = flag & ROUTE_COMPRESSED_FLAG != 0;
        if compressed && !kind.has_route() {
            return Err(MessageError::UnsupportedFlags(flag));
        }

        let id = if kind.has_id() {
            let id = read_varint(&mut rest)?;
            if id == 0 {
                return Err(MessageError::MissingId(kind));
            }
            id
        } else {
            0
        };

        let route = if kind.has_route() {
            let route = if compressed {
                self.read_compressed_route(&mut rest)?
            } else {
                read_raw_route(&mut rest)?
            };
            if route.is_empty() {
                return Err(MessageError::MissingRoute(kind));
            }
            route
        } else {
            String::new()
        };

        let body = if rest.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(rest)?
        };

        Ok(Message {
            kind,
            id,
            route,
            body,
        })
    }

    fn read_compressed_route(&self, rest: &mut &[u8]) -> Result<String, MessageError> {
        if rest.len() < ROUTE_CODE_LEN {
            return Err(MessageError::Truncated("route code"));
        }
        let code = u16::from_be_bytes([rest[0], rest[1]]);
        *rest = &rest[ROUTE_CODE_LEN..];

        self.dictionary
            .route_of(code)
            .map(str::to_owned)
            .ok_or(MessageError::UnknownRouteCode(code))
    }
}

fn read_raw_route(rest: &mut &[u8]) -> Result<String, MessageError> {
    let (&len, tail) = rest
        .split_first()
        .ok_or(MessageError::Truncated("route length"))?;
    let len = usize::from(len);
    if tail.len() < len {
        return Err(MessageError::Truncated("route"));
    }

    let route = std::str::from_utf8(&tail[..len])
        .map_err(|_| MessageError::InvalidRoute)?
        .to_owned();
    *rest = &tail[len..];
    Ok(route)
}

/// Base-128 little-endian varint, high bit marks continuation.
fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let low = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(low);
            return;
        }
        out.push(low | 0x80);
    }
}

fn read_varint(rest: &mut &[u8]) -> Result<u32, MessageError> {
    let mut value: u32 = 0;

    for (index, &byte) in rest.iter().enumerate() {
        if index == MAX_VARINT_LEN {
            return Err(MessageError::IdOverflow);
        }
        let chunk = u32::from(byte & 0x7f);
        let shift = 7 * index as u32;
        if shift == 28 && chunk > 0x0f {
            return Err(MessageError::IdOverflow);
        }
        value |= chunk << shift;

        if byte & 0x80 == 0 {
            *rest = &rest[index + 1..];
            return Ok(value);
        }
    }

    Err(MessageError::Truncated("message id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_dictionary() -> RouteDictionary {
        RouteDictionary::from_entries([("room.join", 1u16), ("onChat", 7u16)])
    }

    #[test]
    fn varint_matches_reference_layout() {
        let mut out = Vec::new();
        write_varint(&mut out, 300);
        assert_eq!(out, vec![0xAC, 0x02]);

        let mut slice = out.as_slice();
        assert_eq!(read_varint(&mut slice).unwrap(), 300);
        assert!(slice.is_empty());
    }

    #[test]
    fn varint_rejects_values_past_u32() {
        let mut slice: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0x1f];
        assert!(matches!(
            read_varint(&mut slice),
            Err(MessageError::IdOverflow)
        ));
    }

    #[test]
    fn request_with_known_route_is_compressed() {
        let codec = MessageCodec::new(sample_dictionary());

        let bytes = codec.encode("room.join", 1, &json!({"id": 1})).unwrap();

        assert_eq!(&bytes[..4], &[ROUTE_COMPRESSED_FLAG, 1, 0, 1]);
        assert_eq!(&bytes[4..], br#"{"id":1}"#);
    }

    #[test]
    fn request_with_unknown_route_is_raw() {
        let codec = MessageCodec::new(sample_dictionary());

        let bytes = codec.encode("chat.send", 2, &json!({})).unwrap();

        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 2);
        assert_eq!(bytes[2] as usize, "chat.send".len());
        assert_eq!(&bytes[3..12], b"chat.send");
    }

    #[test]
    fn zero_id_encodes_notify_without_id() {
        let codec = MessageCodec::default();

        let bytes = codec.encode("area.move", 0, &json!(null)).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(bytes[0] >> KIND_SHIFT, MessageKind::Notify as u8);
        assert_eq!(decoded, Message::notify("area.move", json!(null)));
    }

    #[test]
    fn response_has_no_route() {
        let codec = MessageCodec::new(sample_dictionary());
        let bytes = codec
            .encode_message(&Message::response(9, json!({"ok": true})))
            .unwrap();

        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.kind, MessageKind::Response);
        assert_eq!(decoded.id, 9);
        assert!(decoded.route.is_empty());
        assert_eq!(decoded.body, json!({"ok": true}));
    }

    #[test]
    fn compressed_push_resolves_through_dictionary() {
        let codec = MessageCodec::new(sample_dictionary());
        let bytes = codec
            .encode_message(&Message::push("onChat", json!({"msg": "hi"})))
            .unwrap();

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, Message::push("onChat", json!({"msg": "hi"})));
    }

    #[test]
    fn unknown_route_code_is_malformed() {
        let codec = MessageCodec::new(sample_dictionary());
        let push = [
            ((MessageKind::Push as u8) << KIND_SHIFT) | ROUTE_COMPRESSED_FLAG,
            0,
            42,
        ];

        assert!(matches!(
            codec.decode(&push),
            Err(MessageError::UnknownRouteCode(42))
        ));
    }

    #[test]
    fn truncated_route_is_malformed() {
        let codec = MessageCodec::default();
        let push = [(MessageKind::Push as u8) << KIND_SHIFT, 10, b'a', b'b'];

        assert!(matches!(
            codec.decode(&push),
            Err(MessageError::Truncated("route"))
        ));
    }

    #[test]
    fn unsupported_flags_are_rejected() {
        let codec = MessageCodec::default();
        assert!(matches!(
            codec.decode(&[0x10 | ((MessageKind::Push as u8) << KIND_SHIFT)]),
            Err(MessageError::UnsupportedFlags(_))
        ));
        assert!(matches!(
            codec.decode(&[0x0e]),
            Err(MessageError::UnknownKind(7))
        ));
    }

    #[test]
    fn response_with_zero_id_is_malformed() {
        let codec = MessageCodec::default();
        let bytes = [(MessageKind::Response as u8) << KIND_SHIFT, 0, b'{', b'}'];
        assert!(matches!(
            codec.decode(&bytes),
            Err(MessageError::MissingId(MessageKind::Response))
        ));
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let codec = MessageCodec::default();
        let bytes = [(MessageKind::Response as u8) << KIND_SHIFT, 3];
        assert_eq!(codec.decode(&bytes).unwrap(), Message::response(3, Value::Null));
    }

    #[test]
    fn encode_rejects_oversized_raw_route() {
        let codec = MessageCodec::default();
        let route = "r".repeat(MAX_RAW_ROUTE_LEN + 1);
        assert!(matches!(
            codec.encode(&route, 1, &json!({})),
            Err(MessageError::RouteTooLong(256))
        ));
    }

    #[test]
    fn dictionary_replaces_reassigned_codes() {
        let dictionary = RouteDictionary::from_entries([("a", 1u16), ("b", 1u16)]);
        assert_eq!(dictionary.route_of(1), Some("b"));
        assert_eq!(dictionary.code_of("a"), None);
        assert_eq!(dictionary.len(), 1);
    }
}
