//! Handshake negotiation: the client hello and the server's session parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::RouteDictionary;

/// Protocol version announced in the client hello.
pub const HANDSHAKE_VERSION: &str = "0.3.0";

/// Client type announced when none is configured.
pub const DEFAULT_CLIENT_TYPE: &str = "rust-pinus";

/// Handshake accepted.
pub const CODE_OK: i64 = 200;
/// Server refused the handshake.
pub const CODE_FAIL: i64 = 500;
/// Server requires a newer client.
pub const CODE_OLD_CLIENT: i64 = 501;

/// Heartbeat parameters negotiated for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_secs: u32,
    pub timeout_secs: u32,
}

impl HeartbeatConfig {
    /// Timeout is always twice the interval. An interval of 0 disables heartbeating.
    #[must_use]
    pub const fn from_interval(interval_secs: u32) -> Self {
        Self {
            interval_secs,
            timeout_secs: interval_secs.saturating_mul(2),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.interval_secs > 0
    }
}

/// Schema tables the server may advertise. Kept as raw JSON; payloads stay JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtoTables {
    #[serde(default)]
    pub server: Value,
    #[serde(default)]
    pub client: Value,
}

/// Session parameters derived from an accepted handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeOutcome {
    pub dictionary: RouteDictionary,
    pub heartbeat: HeartbeatConfig,
    pub protos: Option<ProtoTables>,
    /// Application data returned by the server, `{}` when absent.
    pub user: Value,
}

/// Reasons a handshake response is refused.
#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("handshake JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake response has no status code")]
    MissingCode,

    #[error("server requires a newer client version (code 501)")]
    OutdatedClient,

    #[error("server rejected handshake with code {code}")]
    Rejected { code: i64 },

    #[error("handshake response has no system section")]
    MissingSystemInfo,
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    sys: ClientSys<'a>,
    user: &'a Value,
}

#[derive(Serialize)]
struct ClientSys<'a> {
    version: &'a str,
    #[serde(rename = "type")]
    client_type: &'a str,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    code: Option<i64>,
    sys: Option<ServerSys>,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Deserialize)]
struct ServerSys {
    /// Any JSON number; see [`heartbeat_interval`].
    #[serde(default)]
    heartbeat: Option<f64>,
    dict: Option<HashMap<String, u16>>,
    protos: Option<ProtoTables>,
}

/// Whole seconds from the advertised heartbeat. Fractions round to nearest;
/// negative, non-finite or absent values disable heartbeating.
fn heartbeat_interval(secs: Option<f64>) -> u32 {
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => secs.round().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

/// Builds the client hello and validates the server's answer.
#[derive(Clone, Debug)]
pub struct HandshakeNegotiator {
    version: String,
    client_type: String,
}

impl Default for HandshakeNegotiator {
    fn default() -> Self {
        Self::new(HANDSHAKE_VERSION, DEFAULT_CLIENT_TYPE)
    }
}

impl HandshakeNegotiator {
    #[must_use]
    pub fn new(version: impl Into<String>, client_type: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            client_type: client_type.into(),
        }
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    /// Serializes `{"sys": {"version", "type"}, "user": user}`. `None` sends `{}`.
    pub fn build_request(&self, user: Option<&Value>) -> Result<Vec<u8>, HandshakeError> {
        let empty = Value::Object(Map::new());
        let request = HandshakeRequest {
            sys: ClientSys {
                version: &self.version,
                client_type: &self.client_type,
            },
            user: user.unwrap_or(&empty),
        };
        Ok(serde_json::to_vec(&request)?)
    }

    /// Validates the server response and extracts the session parameters.
    pub fn parse_response(&self, bytes: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
        let response: HandshakeResponse = serde_json::from_slice(bytes)?;

        match response.code {
            None => return Err(HandshakeError::MissingCode),
            Some(CODE_OK) => {}
            Some(CODE_OLD_CLIENT) => return Err(HandshakeError::OutdatedClient),
            Some(code) => return Err(HandshakeError::Rejected { code }),
        }

        let sys = response.sys.ok_or(HandshakeError::MissingSystemInfo)?;
        let dictionary = sys
            .dict
            .map(RouteDictionary::from_entries)
            .unwrap_or_default();
        let user = match response.user {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(user) => user,
        };

        Ok(HandshakeOutcome {
            dictionary,
            heartbeat: HeartbeatConfig::from_interval(heartbeat_interval(sys.heartbeat)),
            protos: sys.protos,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_has_fixed_shape() {
        let negotiator = HandshakeNegotiator::new("0.3.0", "rust-tcp");

        let bytes = negotiator.build_request(None).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({"sys": {"version": "0.3.0", "type": "rust-tcp"}, "user": {}})
        );
    }

    #[test]
    fn request_carries_user_data() {
        let bytes = HandshakeNegotiator::default()
            .build_request(Some(&json!({"token": "abc"})))
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["user"]["token"], "abc");
        assert_eq!(value["sys"]["type"], DEFAULT_CLIENT_TYPE);
    }

    #[test]
    fn full_response_is_extracted() {
        let body = json!({
            "code": 200,
            "sys": {
                "heartbeat": 5,
                "dict": {"room.join": 1, "onChat": 2},
                "protos": {"server": {"onChat": {}}, "client": {}}
            },
            "user": {"motd": "welcome"}
        });

        let outcome = HandshakeNegotiator::default()
            .parse_response(body.to_string().as_bytes())
            .unwrap();

        assert_eq!(outcome.heartbeat, HeartbeatConfig::from_interval(5));
        assert_eq!(outcome.heartbeat.timeout_secs, 10);
        assert_eq!(outcome.dictionary.code_of("room.join"), Some(1));
        assert_eq!(outcome.dictionary.route_of(2), Some("onChat"));
        assert!(outcome.protos.is_some());
        assert_eq!(outcome.user, json!({"motd": "welcome"}));
    }

    #[test]
    fn minimal_response_disables_heartbeat() {
        let outcome = HandshakeNegotiator::default()
            .parse_response(br#"{"code":200,"sys":{}}"#)
            .unwrap();

        assert!(!outcome.heartbeat.is_enabled());
        assert!(outcome.dictionary.is_empty());
        assert!(outcome.protos.is_none());
        assert_eq!(outcome.user, json!({}));
    }

    #[test]
    fn rejects_failure_codes() {
        let negotiator = HandshakeNegotiator::default();

        assert!(matches!(
            negotiator.parse_response(br#"{"code":500,"sys":{}}"#),
            Err(HandshakeError::Rejected { code: 500 })
        ));
        assert!(matches!(
            negotiator.parse_response(br#"{"code":501}"#),
            Err(HandshakeError::OutdatedClient)
        ));
        assert!(matches!(
            negotiator.parse_response(br#"{"sys":{}}"#),
            Err(HandshakeError::MissingCode)
        ));
    }

    #[test]
    fn rejects_missing_system_section() {
        assert!(matches!(
            HandshakeNegotiator::default().parse_response(br#"{"code":200}"#),
            Err(HandshakeError::MissingSystemInfo)
        ));
    }

    #[test]
    fn rejects_non_json_and_bad_dictionary() {
        let negotiator = HandshakeNegotiator::default();

        assert!(matches!(
            negotiator.parse_response(b"not json"),
            Err(HandshakeError::Json(_))
        ));
        assert!(matches!(
            negotiator.parse_response(br#"{"code":200,"sys":{"dict":{"a":-1}}}"#),
            Err(HandshakeError::Json(_))
        ));
    }

    #[test]
    fn heartbeat_accepts_any_json_number() {
        let negotiator = HandshakeNegotiator::default();
        let interval = |body: &str| {
            negotiator
                .parse_response(body.as_bytes())
                .unwrap()
                .heartbeat
                .interval_secs
        };

        assert_eq!(interval(r#"{"code":200,"sys":{"heartbeat":3}}"#), 3);
        assert_eq!(interval(r#"{"code":200,"sys":{"heartbeat":2.6}}"#), 3);
        assert_eq!(interval(r#"{"code":200,"sys":{"heartbeat":-4}}"#), 0);
        assert_eq!(interval(r#"{"code":200,"sys":{"heartbeat":null}}"#), 0);
        assert_eq!(interval(r#"{"code":200,"sys":{}}"#), 0);
    }
}
