//! Server and WebSocket configuration.
//!
//! Every field has a default, so a configuration file only needs to list the
//! values it changes.
//!
//! ```
//! use trellis_core::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "websocket": { "max_payload_size": 1024 } }"#).unwrap();
//! assert_eq!(config.websocket.max_payload_size, 1024);
//! assert_eq!(config.max_header_bytes, 8192);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::DEFAULT_MAX_PAYLOAD;

const DEFAULT_BUFFER_SIZE: usize = 4096;

/// HTTP serving limits and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum size of a request line plus headers.
    pub max_header_bytes: usize,

    /// Maximum accepted `Content-Length`.
    pub max_body_bytes: usize,

    /// Idle time allowed between requests on a keep-alive connection.
    pub read_timeout_secs: u64,

    /// Number of request contexts kept for reuse.
    pub context_pool_size: usize,

    /// Settings applied to upgraded connections.
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8192,
            max_body_bytes: 4 << 20,
            read_timeout_secs: 30,
            context_pool_size: 256,
            websocket: WebSocketConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ServerConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Reads and parses a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    fn normalized(mut self) -> Self {
        self.websocket = self.websocket.normalized();
        self
    }
}

/// Buffer sizes and limits for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Initial capacity of the frame read buffer. Zero means the default.
    pub read_buffer_size: usize,

    /// Capacity of the buffered writer. Zero means the default.
    pub write_buffer_size: usize,

    /// Largest frame payload accepted from the peer.
    pub max_payload_size: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl WebSocketConfig {
    /// Replaces zero buffer sizes with the defaults.
    pub fn normalized(mut self) -> Self {
        if self.read_buffer_size == 0 {
            self.read_buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.write_buffer_size == 0 {
            self.write_buffer_size = DEFAULT_BUFFER_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_header_bytes, 8192);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.context_pool_size, 256);
        assert_eq!(config.websocket.read_buffer_size, 4096);
        assert_eq!(config.websocket.max_payload_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json(r#"{"read_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.read_timeout_secs, 5);
        assert_eq!(config.max_body_bytes, 4 << 20);
        assert_eq!(config.websocket, WebSocketConfig::default());
    }

    #[test]
    fn test_zero_buffers_fall_back() {
        let config = ServerConfig::from_json(
            r#"{"websocket": {"read_buffer_size": 0, "write_buffer_size": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.websocket.read_buffer_size, 4096);
        assert_eq!(config.websocket.write_buffer_size, 4096);
    }

    #[test]
    fn test_invalid_json() {
        assert!(ServerConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("trellis-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"context_pool_size": 8}"#).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.context_pool_size, 8);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServerConfig::load("/nonexistent/trellis.json").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
