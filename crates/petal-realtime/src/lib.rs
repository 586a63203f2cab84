//! Petal Realtime
//!
//! STOMP-over-WebSocket client for the Petal storefront broker. One
//! [`RealtimeService`] keeps a single socket to the broker, multiplexes
//! topic subscriptions over it, dispatches typed inbound events to handlers
//! and reconnects on its own after transport failures.
//!
//! ```no_run
//! use petal_core::RealtimeConfig;
//! use petal_realtime::{ConnectOptions, RealtimeService, WebSocketConnector};
//!
//! # async fn demo() -> petal_core::Result<()> {
//! let service = RealtimeService::new(RealtimeConfig::default(), WebSocketConnector::new());
//! service.connect(ConnectOptions::guest("guest-42").with_session("S-1")).await?;
//! let messages = service.subscribe_to_session("S-1", |message| {
//!     println!("{:?}: {}", message.sender_type, message.content);
//! });
//! # messages.unsubscribe();
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod connection;
pub mod conversation;
pub mod registry;
pub mod router;
pub mod service;
pub mod status;
pub mod transport;
pub mod websocket;

#[cfg(feature = "testing")]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use connection::ConnectOptions;
pub use conversation::{Conversation, MessageApi, SendFailure};
pub use registry::{Handler, HandlerId};
pub use router::AdminNotificationHandlers;
pub use service::{RealtimeService, SubscriptionHandle};
pub use status::{ConnectionState, ConnectionStatus, ListenerHandle};
pub use transport::{socket_pair, Connector, SocketChannels, SocketEvent, SocketPeer, SocketTarget};
pub use websocket::WebSocketConnector;

#[cfg(feature = "testing")]
pub use testing::{MockBehavior, MockConnector};
