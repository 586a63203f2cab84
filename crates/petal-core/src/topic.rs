//! Typed broker destinations
//!
//! Inbound broadcast channels are modelled as [`Topic`] values rather than
//! ad-hoc strings so the subscription registry can key on them directly.
//! Client-to-server commands are [`AppCommand`] values.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Prefix for server-to-client broadcast destinations
pub const TOPIC_PREFIX: &str = "/topic";

/// Prefix for client-to-server command destinations
pub const APP_PREFIX: &str = "/app";

// ----------------------------------------------------------------------------
// Topic Kinds
// ----------------------------------------------------------------------------

/// Parameterless classification of a topic, used for logging and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    ChatSession,
    ChatTyping,
    ChatStatus,
    Ticket,
    UserNotifications,
    AdminNotifications,
    AdminOnlineStatus,
    ProductReviews,
}

/// A logical broadcast channel on the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Chat messages of one live-chat session
    ChatSession(String),
    /// Typing indicators of one live-chat session
    ChatTyping(String),
    /// Status changes (assigned, closed, ...) of one live-chat session
    ChatStatus(String),
    /// Replies on one support ticket
    Ticket(String),
    /// Notifications addressed to one user
    UserNotifications(String),
    /// Back-office broadcast of new sessions, tickets, orders, reviews
    AdminNotifications,
    /// Staff presence broadcast
    AdminOnlineStatus,
    /// Review updates for one product
    ProductReviews(String),
}

impl Topic {
    /// Topic kind without its parameter
    pub fn kind(&self) -> TopicKind {
        match self {
            Topic::ChatSession(_) => TopicKind::ChatSession,
            Topic::ChatTyping(_) => TopicKind::ChatTyping,
            Topic::ChatStatus(_) => TopicKind::ChatStatus,
            Topic::Ticket(_) => TopicKind::Ticket,
            Topic::UserNotifications(_) => TopicKind::UserNotifications,
            Topic::AdminNotifications => TopicKind::AdminNotifications,
            Topic::AdminOnlineStatus => TopicKind::AdminOnlineStatus,
            Topic::ProductReviews(_) => TopicKind::ProductReviews,
        }
    }

    /// Render the STOMP destination for this topic
    pub fn destination(&self) -> String {
        match self {
            Topic::ChatSession(id) => format!("{TOPIC_PREFIX}/chat/{id}"),
            Topic::ChatTyping(id) => format!("{TOPIC_PREFIX}/chat/{id}/typing"),
            Topic::ChatStatus(id) => format!("{TOPIC_PREFIX}/chat/{id}/status"),
            Topic::Ticket(id) => format!("{TOPIC_PREFIX}/ticket/{id}"),
            Topic::UserNotifications(id) => format!("{TOPIC_PREFIX}/user/{id}/notifications"),
            Topic::AdminNotifications => format!("{TOPIC_PREFIX}/admin/notifications"),
            Topic::AdminOnlineStatus => format!("{TOPIC_PREFIX}/admin/online-status"),
            Topic::ProductReviews(id) => format!("{TOPIC_PREFIX}/product/{id}/reviews"),
        }
    }

    /// Parse a STOMP destination back into a topic
    pub fn from_destination(destination: &str) -> Result<Self, ProtocolError> {
        let unknown = || ProtocolError::UnknownDestination {
            destination: destination.to_string(),
        };

        let rest = destination
            .strip_prefix(TOPIC_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(unknown());
        }

        let topic = match segments.as_slice() {
            ["chat", id] => Topic::ChatSession((*id).to_string()),
            ["chat", id, "typing"] => Topic::ChatTyping((*id).to_string()),
            ["chat", id, "status"] => Topic::ChatStatus((*id).to_string()),
            ["ticket", id] => Topic::Ticket((*id).to_string()),
            ["user", id, "notifications"] => Topic::UserNotifications((*id).to_string()),
            ["admin", "notifications"] => Topic::AdminNotifications,
            ["admin", "online-status"] => Topic::AdminOnlineStatus,
            ["product", id, "reviews"] => Topic::ProductReviews((*id).to_string()),
            _ => return Err(unknown()),
        };
        Ok(topic)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

// ----------------------------------------------------------------------------
// Outbound Commands
// ----------------------------------------------------------------------------

/// Client-to-server command destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppCommand {
    /// Announce presence (guest id / session id / user id) after connecting
    Register,
    /// Post a chat message into a session
    SendMessage,
    /// Typing indicator for a session
    Typing,
    /// Mark a session's messages as read
    MarkRead,
    /// Reply on a support ticket
    TicketReply,
}

impl AppCommand {
    /// Render the STOMP destination for this command
    pub fn destination(&self) -> &'static str {
        match self {
            AppCommand::Register => "/app/chat.register",
            AppCommand::SendMessage => "/app/chat.send",
            AppCommand::Typing => "/app/chat.typing",
            AppCommand::MarkRead => "/app/chat.read",
            AppCommand::TicketReply => "/app/ticket.reply",
        }
    }
}

impl fmt::Display for AppCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.destination())
    }
}
