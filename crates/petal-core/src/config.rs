//! Realtime client configuration
//!
//! One structure covers the connection endpoint, reconnect policy and
//! heart-beating. Presets mirror the environments the client runs in.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigError;
use crate::frame::HeartBeat;

// ----------------------------------------------------------------------------
// Realtime Configuration
// ----------------------------------------------------------------------------

/// Configuration for the realtime messaging client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Broker endpoint (`http(s)://` or `ws(s)://`)
    pub endpoint: String,
    /// Use SockJS WebSocket framing on top of the socket
    pub sockjs: bool,
    /// STOMP `host` header; derived from the endpoint when unset
    pub host: Option<String>,
    /// Fixed delay between automatic reconnect attempts
    #[serde(with = "duration_ms")]
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_retries: u32,
    /// Budget for opening the socket and completing the STOMP handshake
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How often we offer to send heart-beats (zero disables)
    #[serde(with = "duration_ms")]
    pub heartbeat_outgoing: Duration,
    /// How often we ask the broker to send heart-beats (zero disables)
    #[serde(with = "duration_ms")]
    pub heartbeat_incoming: Duration,
    /// Missed incoming intervals tolerated before the link is considered dead
    pub heartbeat_tolerance: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/ws/chat".to_string(),
            sockjs: true,
            host: None,
            reconnect_delay: Duration::from_secs(5),
            max_retries: 5,
            connect_timeout: Duration::from_secs(10),
            heartbeat_outgoing: Duration::from_secs(4),
            heartbeat_incoming: Duration::from_secs(4),
            heartbeat_tolerance: 2,
        }
    }
}

impl RealtimeConfig {
    /// Configuration for a broker running on the developer's machine
    pub fn local_development() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            max_retries: 10,
            connect_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Configuration for in-process tests (plain STOMP, short timers)
    pub fn testing() -> Self {
        Self {
            endpoint: "ws://broker.test/ws/chat".to_string(),
            sockjs: false,
            host: None,
            reconnect_delay: Duration::from_millis(100),
            max_retries: 3,
            connect_timeout: Duration::from_secs(1),
            heartbeat_outgoing: Duration::ZERO,
            heartbeat_incoming: Duration::ZERO,
            heartbeat_tolerance: 2,
        }
    }

    /// Point the configuration at another endpoint
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Heart-beat offer sent in CONNECT
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat::new(self.heartbeat_outgoing, self.heartbeat_incoming)
    }

    /// STOMP `host` header value
    pub fn stomp_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        Url::parse(&self.endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if !self.sockjs && matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "plain STOMP needs a ws:// or wss:// endpoint".to_string(),
            });
        }
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_delay",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_tolerance == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_tolerance",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Durations are written as integer milliseconds in config files
mod duration_ms {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
