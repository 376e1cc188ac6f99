use serde::Deserialize;
use std::fs;
use std::path::Path;

use pinus_protocol::{FrameLimits, HANDSHAKE_VERSION, MAX_FRAME_BODY_LEN};

use crate::error::{ClientError, Result};
use crate::request_id::DEFAULT_REQUEST_ID_CEILING;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub handshake: HandshakeSettings,
    pub requests: RequestSettings,
    pub transport: TransportSettings,
    pub limits: LimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    pub version: String,
    /// Overrides the `type` sent in the hello; defaults to one per transport.
    pub client_type: Option<String>,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            version: HANDSHAKE_VERSION.to_string(),
            client_type: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Exclusive upper bound of request ids.
    pub id_ceiling: u32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            id_ceiling: DEFAULT_REQUEST_ID_CEILING,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_frame_body: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_frame_body: MAX_FRAME_BODY_LEN,
        }
    }
}

impl LimitSettings {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_body_len: self.max_frame_body,
        }
    }
}

impl ClientConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Hello `type`, falling back to `fallback` (usually the transport's own).
    pub fn client_type_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.handshake.client_type.as_deref().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[handshake]
version = "0.4.0"
client_type = "bot"

[requests]
id_ceiling = 16

[transport]
connect_timeout_ms = 250

[limits]
max_frame_body = 65536
        "#;

        let config = ClientConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.handshake.version, "0.4.0");
        assert_eq!(config.client_type_or("rust-tcp"), "bot");
        assert_eq!(config.requests.id_ceiling, 16);
        assert_eq!(config.transport.connect_timeout_ms, 250);
        assert_eq!(config.limits.frame_limits().max_body_len, 65536);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = ClientConfig::from_toml("[transport]\nconnect_timeout_ms = 10\n").unwrap();
        assert_eq!(config.handshake.version, HANDSHAKE_VERSION);
        assert_eq!(config.client_type_or("rust-websocket"), "rust-websocket");
        assert_eq!(config.requests.id_ceiling, DEFAULT_REQUEST_ID_CEILING);
        assert_eq!(config.limits.max_frame_body, MAX_FRAME_BODY_LEN);
        assert_eq!(config.transport.connect_timeout_ms, 10);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ClientConfig::from_toml("requests = 3").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ClientConfig::load_from_file("/nonexistent/pinus-client.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
