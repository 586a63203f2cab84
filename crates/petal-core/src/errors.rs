//! Error types for the Petal realtime client
//!
//! Errors are grouped by where they originate: the socket (`TransportError`),
//! the STOMP/SockJS conversation with the broker (`ProtocolError`), outbound
//! sends (`SendError`) and configuration (`ConfigError`). `PetalError` unifies
//! them for callers that do not care which layer failed.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of the underlying socket
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open socket to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    #[error("Socket closed: {reason}")]
    Closed { reason: String },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("No heartbeat received for {duration_ms}ms")]
    HeartbeatTimeout { duration_ms: u64 },
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("Connection superseded: {reason}")]
    Superseded { reason: String },
}

/// Failures of the broker conversation (handshake and frame level)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Handshake rejected: {reason}")]
    HandshakeRejected { reason: String },
    #[error("Broker error: {message}")]
    BrokerError { message: String },
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("Unknown frame command: {command}")]
    UnknownCommand { command: String },
    #[error("Malformed SockJS frame: {reason}")]
    MalformedSockJs { reason: String },
    #[error("Malformed payload on {destination}: {reason}")]
    MalformedPayload { destination: String, reason: String },
    #[error("Unknown destination: {destination}")]
    UnknownDestination { destination: String },
    #[error("Unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
}

/// Failures reported to the caller of a send
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,
    #[error("Socket channel closed")]
    ChannelClosed,
    #[error("Failed to encode payload: {reason}")]
    Encode { reason: String },
    #[error("Fallback delivery failed: {reason}")]
    Fallback { reason: String },
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the Petal realtime client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PetalError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The driver task is gone (every service handle dropped or runtime shut down)
    #[error("Service stopped")]
    ServiceStopped,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl PetalError {
    /// Create a malformed frame error
    pub fn malformed_frame<T: Into<String>>(reason: T) -> Self {
        PetalError::Protocol(ProtocolError::MalformedFrame {
            reason: reason.into(),
        })
    }

    /// Create a handshake rejection error
    pub fn handshake_rejected<T: Into<String>>(reason: T) -> Self {
        PetalError::Protocol(ProtocolError::HandshakeRejected {
            reason: reason.into(),
        })
    }

    /// Create a socket open failure
    pub fn connect_failed<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        PetalError::Transport(TransportError::ConnectFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        })
    }

    /// Create a socket closed error
    pub fn closed<T: Into<String>>(reason: T) -> Self {
        PetalError::Transport(TransportError::Closed {
            reason: reason.into(),
        })
    }

    /// Create a configuration error for a single field
    pub fn invalid_config<T: Into<String>>(field: &'static str, reason: T) -> Self {
        PetalError::Config(ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        })
    }

    /// Whether retrying the same operation later could succeed
    ///
    /// Protocol and configuration errors need caller intervention (new
    /// credentials, fixed config); transport errors are retried automatically.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PetalError::Transport(TransportError::RetriesExhausted { .. }) => false,
            PetalError::Transport(TransportError::Superseded { .. }) => false,
            PetalError::Transport(_) => true,
            PetalError::Send(SendError::NotConnected) => true,
            PetalError::Send(_) => false,
            PetalError::Protocol(_) | PetalError::Config(_) | PetalError::ServiceStopped => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, PetalError>;
pub type PetalResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_layer() {
        let err = PetalError::handshake_rejected("bad token");
        assert_eq!(
            err.to_string(),
            "Protocol error: Handshake rejected: bad token"
        );

        let err: PetalError = SendError::NotConnected.into();
        assert_eq!(err.to_string(), "Send error: Not connected");
    }

    #[test]
    fn test_recoverability() {
        assert!(PetalError::closed("reset by peer").is_recoverable());
        assert!(!PetalError::handshake_rejected("401").is_recoverable());
        assert!(!PetalError::from(TransportError::RetriesExhausted { attempts: 5 }).is_recoverable());
        assert!(!PetalError::invalid_config("max_retries", "zero").is_recoverable());
    }
}
