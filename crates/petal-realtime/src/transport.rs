//! Socket abstraction used by the connection driver
//!
//! A [`Connector`] opens one socket and hands back a pair of channels: STOMP
//! text goes out on `outbound`, decoded socket events come back on
//! `inbound`. Dropping the outbound sender closes the socket. Any SockJS
//! framing is the connector's business, so the driver only sees STOMP text.

use async_trait::async_trait;
use tokio::sync::mpsc;

use petal_core::Result;

// ----------------------------------------------------------------------------
// Socket Types
// ----------------------------------------------------------------------------

/// Where and how to open the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTarget {
    /// Broker endpoint as configured
    pub endpoint: String,
    /// Whether the endpoint sits behind SockJS
    pub sockjs: bool,
    /// Bearer credential attached to the HTTP upgrade
    pub bearer_token: Option<String>,
}

/// Something that happened on an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// STOMP text (possibly several frames or a bare heart-beat)
    Text(String),
    /// Transport-level keep-alive that carries no STOMP data
    Heartbeat,
    /// The socket is gone; no further events follow
    Closed(String),
}

/// Client side of an open socket
#[derive(Debug)]
pub struct SocketChannels {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Connector side of an open socket
#[derive(Debug)]
pub struct SocketPeer {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<SocketEvent>,
}

/// Create the two ends of a socket
pub fn socket_pair() -> (SocketChannels, SocketPeer) {
    let (outbound, from_client) = mpsc::unbounded_channel();
    let (to_client, inbound) = mpsc::unbounded_channel();
    (
        SocketChannels { outbound, inbound },
        SocketPeer {
            from_client,
            to_client,
        },
    )
}

// ----------------------------------------------------------------------------
// Connector Trait
// ----------------------------------------------------------------------------

/// Opens sockets to the broker
///
/// Implementations report a rejected HTTP upgrade (401/403) as
/// `ProtocolError::HandshakeRejected` and every other failure to open as a
/// `TransportError`, which the driver retries.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, target: &SocketTarget) -> Result<SocketChannels>;

    /// Short name used in logs
    fn name(&self) -> &'static str {
        "connector"
    }
}
