//! Petal Core
//!
//! Transport-independent building blocks of the Petal storefront realtime
//! client: typed broker topics, the STOMP 1.2 and SockJS codecs, the inbound
//! event model, the optimistic conversation view and client configuration.
//! Nothing in this crate performs I/O.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod conversation;
pub mod errors;
pub mod event;
pub mod frame;
pub mod sockjs;
pub mod topic;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::RealtimeConfig;
pub use conversation::{
    Applied, ConversationView, DisplayedMessage, MessageKey, ProvisionalId, PROVISIONAL_PREFIX,
};
pub use errors::{
    ConfigError, PetalError, PetalResult, ProtocolError, Result, SendError, TransportError,
};
pub use event::{
    AdminNotification, ChatMessage, InboundEvent, MarkRead, MessageKind, OnlineStatus,
    OrderNotice, OutgoingChatMessage, OutgoingTicketReply, OutgoingTyping, PaymentNotice,
    PresenceRegistration, ReviewUpdate, SenderType, SessionNotice, SessionStatusChange,
    TicketMessage, TicketNotice, TypingIndicator, UserNotification,
};
pub use frame::{Frame, FrameCommand, HeartBeat, Inbound};
pub use sockjs::SockJsFrame;
pub use topic::{AppCommand, Topic, TopicKind};
