//! Inbound event model
//!
//! Every MESSAGE frame body is JSON. The topic a frame arrived on decides
//! which payload shape to expect; the admin broadcast topic carries a union
//! discriminated by its `type` field. Decoding happens once, at the router
//! boundary, into [`InboundEvent`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::topic::{Topic, TopicKind};

// ----------------------------------------------------------------------------
// Identifier Helpers
// ----------------------------------------------------------------------------

/// The backend emits some ids as numbers and some as strings
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

// ----------------------------------------------------------------------------
// Chat Payloads
// ----------------------------------------------------------------------------

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    /// Shopper, signed in or guest
    #[serde(alias = "USER", alias = "GUEST")]
    Customer,
    /// Back-office staff member
    #[serde(alias = "ADMIN", alias = "AGENT")]
    Staff,
    /// Automated assistant
    #[serde(alias = "AI")]
    Bot,
    System,
}

/// Kind of chat message content
///
/// Kinds this client does not know are kept verbatim so a message
/// re-serializes with the tag it arrived with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Product,
    Order,
    System,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "TEXT",
            MessageKind::Image => "IMAGE",
            MessageKind::File => "FILE",
            MessageKind::Product => "PRODUCT",
            MessageKind::Order => "ORDER",
            MessageKind::System => "SYSTEM",
            MessageKind::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "TEXT" => MessageKind::Text,
            "IMAGE" => MessageKind::Image,
            "FILE" => MessageKind::File,
            "PRODUCT" => MessageKind::Product,
            "ORDER" => MessageKind::Order,
            "SYSTEM" => MessageKind::System,
            _ => MessageKind::Other(tag),
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MessageKind::from)
    }
}

/// A chat message as persisted and echoed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-issued id, absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "id_string")]
    pub session_id: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Provisional id of the send this confirms, when the server echoes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Someone started or stopped typing in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    #[serde(deserialize_with = "id_string")]
    pub session_id: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(alias = "isTyping")]
    pub typing: bool,
}

/// A live-chat session changed state (assigned, closed, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChange {
    #[serde(deserialize_with = "id_string")]
    pub session_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_staff: Option<String>,
}

/// A reply on a support ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "id_string")]
    pub ticket_id: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ----------------------------------------------------------------------------
// Notification Payloads
// ----------------------------------------------------------------------------

/// Notification addressed to a single user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Staff presence change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatus {
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "isOnline")]
    pub online: bool,
}

/// New live-chat session opened by a shopper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotice {
    #[serde(deserialize_with = "id_string")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
}

/// New support ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketNotice {
    #[serde(deserialize_with = "id_string")]
    pub ticket_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
}

/// Order placed or cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotice {
    #[serde(deserialize_with = "id_string")]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payment received or failed for an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotice {
    #[serde(deserialize_with = "id_string")]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Review created or moderated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdate {
    #[serde(deserialize_with = "id_string")]
    pub product_id: String,
    #[serde(default, deserialize_with = "opt_id_string", skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,
}

/// Back-office broadcast, discriminated by the `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminNotification {
    NewSession(SessionNotice),
    NewMessage(ChatMessage),
    NewTicket(TicketNotice),
    NewOrder(OrderNotice),
    OrderCancelled(OrderNotice),
    Payment(PaymentNotice),
    NewReview(ReviewUpdate),
    ReviewUpdate(ReviewUpdate),
}

impl AdminNotification {
    /// Wire names of every known notification type
    pub const TYPES: &'static [&'static str] = &[
        "NEW_SESSION",
        "NEW_MESSAGE",
        "NEW_TICKET",
        "NEW_ORDER",
        "ORDER_CANCELLED",
        "PAYMENT",
        "NEW_REVIEW",
        "REVIEW_UPDATE",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            AdminNotification::NewSession(_) => "NEW_SESSION",
            AdminNotification::NewMessage(_) => "NEW_MESSAGE",
            AdminNotification::NewTicket(_) => "NEW_TICKET",
            AdminNotification::NewOrder(_) => "NEW_ORDER",
            AdminNotification::OrderCancelled(_) => "ORDER_CANCELLED",
            AdminNotification::Payment(_) => "PAYMENT",
            AdminNotification::NewReview(_) => "NEW_REVIEW",
            AdminNotification::ReviewUpdate(_) => "REVIEW_UPDATE",
        }
    }

    fn decode(destination: &str, value: Value) -> Result<Self, ProtocolError> {
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedPayload {
                destination: destination.to_string(),
                reason: "missing 'type' field".to_string(),
            })?;
        if !Self::TYPES.iter().any(|known| *known == event_type) {
            return Err(ProtocolError::UnknownEventType {
                event_type: event_type.to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
            destination: destination.to_string(),
            reason: e.to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Inbound Event
// ----------------------------------------------------------------------------

/// A decoded payload received on a topic
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(ChatMessage),
    Typing(TypingIndicator),
    Status(SessionStatusChange),
    TicketMessage(TicketMessage),
    Notification(AdminNotification),
    UserNotification(UserNotification),
    OnlineStatus(OnlineStatus),
    Review(ReviewUpdate),
}

impl InboundEvent {
    /// Decode a MESSAGE body according to the topic it arrived on
    ///
    /// Chat session topics may multiplex typing and status payloads; those
    /// carry a `type` of `TYPING` or `STATUS`/`STATUS_CHANGE`.
    pub fn decode(topic: &Topic, body: &str) -> Result<Self, ProtocolError> {
        let destination = topic.destination();
        let value: Value = serde_json::from_str(body).map_err(|e| ProtocolError::MalformedPayload {
            destination: destination.clone(),
            reason: e.to_string(),
        })?;

        fn parse<T: serde::de::DeserializeOwned>(
            destination: &str,
            value: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
                destination: destination.to_string(),
                reason: e.to_string(),
            })
        }

        let event = match topic.kind() {
            TopicKind::ChatSession => match value.get("type").and_then(Value::as_str) {
                Some("TYPING") => InboundEvent::Typing(parse(&destination, value)?),
                Some("STATUS") | Some("STATUS_CHANGE") => {
                    InboundEvent::Status(parse(&destination, value)?)
                }
                _ => InboundEvent::Message(parse(&destination, value)?),
            },
            TopicKind::ChatTyping => InboundEvent::Typing(parse(&destination, value)?),
            TopicKind::ChatStatus => InboundEvent::Status(parse(&destination, value)?),
            TopicKind::Ticket => InboundEvent::TicketMessage(parse(&destination, value)?),
            TopicKind::UserNotifications => {
                InboundEvent::UserNotification(parse(&destination, value)?)
            }
            TopicKind::AdminNotifications => {
                InboundEvent::Notification(AdminNotification::decode(&destination, value)?)
            }
            TopicKind::AdminOnlineStatus => InboundEvent::OnlineStatus(parse(&destination, value)?),
            TopicKind::ProductReviews => InboundEvent::Review(parse(&destination, value)?),
        };
        Ok(event)
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            InboundEvent::Message(_) => "message",
            InboundEvent::Typing(_) => "typing",
            InboundEvent::Status(_) => "status",
            InboundEvent::TicketMessage(_) => "ticket-message",
            InboundEvent::Notification(n) => n.type_name(),
            InboundEvent::UserNotification(_) => "user-notification",
            InboundEvent::OnlineStatus(_) => "online-status",
            InboundEvent::Review(_) => "review",
        }
    }
}

// ----------------------------------------------------------------------------
// Outbound Payloads
// ----------------------------------------------------------------------------

/// Body of `/app/chat.register`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRegistration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Body of `/app/chat.send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChatMessage {
    pub session_id: String,
    pub sender_type: SenderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: MessageKind,
    /// Provisional id, echoed back by servers that support it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Body of `/app/chat.typing`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingTyping {
    pub session_id: String,
    pub sender_type: SenderType,
    pub typing: bool,
}

/// Body of `/app/chat.read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub session_id: String,
    pub reader_type: SenderType,
}

/// Body of `/app/ticket.reply`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingTicketReply {
    pub ticket_id: String,
    pub sender_type: SenderType,
    pub content: String,
}
