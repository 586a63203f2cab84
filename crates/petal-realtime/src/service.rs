//! Realtime service handle
//!
//! [`RealtimeService`] is the one entry point to the broker connection.
//! Construct it once at startup and clone it wherever it is needed; every
//! clone talks to the same driver task, registry and socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use petal_core::{
    AppCommand, ChatMessage, Frame, InboundEvent, MarkRead, MessageKind, OnlineStatus,
    OutgoingChatMessage, OutgoingTicketReply, OutgoingTyping, PetalError, RealtimeConfig, Result,
    ReviewUpdate, SendError, SenderType, SessionStatusChange, TicketMessage, Topic,
    TypingIndicator, UserNotification,
};

use crate::connection::{Command, ConnectOptions, Driver, DriverShared};
use crate::registry::{self, Handler, HandlerId, Registry, SharedRegistry};
use crate::router::AdminNotificationHandlers;
use crate::status::{self, ConnectionStatus, ListenerHandle, SharedListeners};
use crate::transport::Connector;

// ----------------------------------------------------------------------------
// Subscription Handle
// ----------------------------------------------------------------------------

/// Disposer for one handler registered with [`RealtimeService::subscribe`]
#[must_use = "dropping the handle keeps the handler subscribed; call unsubscribe() to detach it"]
pub struct SubscriptionHandle {
    topic: Topic,
    id: HandlerId,
    registry: SharedRegistry,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Detach this handler; the topic is unsubscribed when no handler remains
    ///
    /// Takes effect before the next frame is dispatched.
    pub fn unsubscribe(self) -> bool {
        registry::lock(&self.registry).remove_handler(&self.topic, self.id)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Realtime Service
// ----------------------------------------------------------------------------

struct Inner {
    config: RealtimeConfig,
    commands: mpsc::UnboundedSender<Command>,
    registry: SharedRegistry,
    listeners: SharedListeners,
    status: watch::Receiver<ConnectionStatus>,
    connected: Arc<AtomicBool>,
}

/// Cloneable handle to the single broker connection
#[derive(Clone)]
pub struct RealtimeService {
    inner: Arc<Inner>,
}

impl RealtimeService {
    /// Spawn the connection driver on the current tokio runtime
    ///
    /// The driver stops once every clone of the service is dropped.
    pub fn new<C: Connector>(config: RealtimeConfig, connector: C) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::disconnected(config.max_retries));
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::default()));
        let listeners: SharedListeners = Arc::default();
        let connected = Arc::new(AtomicBool::new(false));

        let driver = Driver::new(
            config.clone(),
            connector,
            command_rx,
            DriverShared {
                registry: registry.clone(),
                listeners: listeners.clone(),
                status: status_tx,
                connected: connected.clone(),
            },
        );
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Inner {
                config,
                commands,
                registry,
                listeners,
                status,
                connected,
            }),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Connect and complete the STOMP handshake
    ///
    /// Resolves immediately when already connected and joins the attempt in
    /// flight otherwise, so at most one socket exists. A rejected handshake
    /// fails without retry; transport failures are retried and surface only
    /// once the retry budget is spent.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Connect { options, reply })
            .map_err(|_| PetalError::ServiceStopped)?;
        rx.await.map_err(|_| PetalError::ServiceStopped)?
    }

    /// Close the session and drop every subscription
    ///
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Disconnect { reply })
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// Register a callback for status changes
    pub fn on_connection_status<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let id = status::lock_listeners(&self.inner.listeners).add(Arc::new(callback));
        ListenerHandle::new(id, self.inner.listeners.clone())
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Attach a handler to a topic
    ///
    /// The first handler of a topic subscribes it on the broker (or queues it
    /// until the next handshake); later handlers share that subscription.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionHandle
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribe_handler(topic, Arc::new(handler))
    }

    fn subscribe_handler(&self, topic: Topic, handler: Handler) -> SubscriptionHandle {
        let id = registry::lock(&self.inner.registry).add_handler(topic.clone(), handler);
        SubscriptionHandle {
            topic,
            id,
            registry: self.inner.registry.clone(),
        }
    }

    /// Remove a topic and all of its handlers
    pub fn unsubscribe_topic(&self, topic: &Topic) -> bool {
        registry::lock(&self.inner.registry).remove_topic(topic)
    }

    /// Topics with at least one handler, sorted
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        registry::lock(&self.inner.registry).topics()
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        registry::lock(&self.inner.registry).handler_count(topic)
    }

    /// Chat messages of a live-chat session
    pub fn subscribe_to_session<F>(&self, session_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.subscribe(Topic::ChatSession(session_id.to_string()), move |event| {
            if let InboundEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    /// Typing indicators of a live-chat session
    pub fn subscribe_to_typing<F>(&self, session_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&TypingIndicator) + Send + Sync + 'static,
    {
        self.subscribe(Topic::ChatTyping(session_id.to_string()), move |event| {
            if let InboundEvent::Typing(typing) = event {
                handler(typing);
            }
        })
    }

    /// Status changes of a live-chat session
    pub fn subscribe_to_session_status<F>(&self, session_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SessionStatusChange) + Send + Sync + 'static,
    {
        self.subscribe(Topic::ChatStatus(session_id.to_string()), move |event| {
            if let InboundEvent::Status(change) = event {
                handler(change);
            }
        })
    }

    /// Replies on a support ticket
    pub fn subscribe_to_ticket<F>(&self, ticket_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&TicketMessage) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Ticket(ticket_id.to_string()), move |event| {
            if let InboundEvent::TicketMessage(message) = event {
                handler(message);
            }
        })
    }

    /// Notifications addressed to one user
    pub fn subscribe_to_user_notifications<F>(&self, user_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&UserNotification) + Send + Sync + 'static,
    {
        self.subscribe(Topic::UserNotifications(user_id.to_string()), move |event| {
            if let InboundEvent::UserNotification(notification) = event {
                handler(notification);
            }
        })
    }

    /// Back-office broadcast, dispatched by notification kind
    pub fn subscribe_to_admin_notifications(
        &self,
        handlers: AdminNotificationHandlers,
    ) -> SubscriptionHandle {
        self.subscribe_handler(Topic::AdminNotifications, handlers.into_handler())
    }

    /// Staff presence broadcast
    pub fn subscribe_to_online_status<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&OnlineStatus) + Send + Sync + 'static,
    {
        self.subscribe(Topic::AdminOnlineStatus, move |event| {
            if let InboundEvent::OnlineStatus(status) = event {
                handler(status);
            }
        })
    }

    /// Review updates for one product
    pub fn subscribe_to_product_reviews<F>(&self, product_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ReviewUpdate) + Send + Sync + 'static,
    {
        self.subscribe(Topic::ProductReviews(product_id.to_string()), move |event| {
            if let InboundEvent::Review(review) = event {
                handler(review);
            }
        })
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Publish a JSON payload to a command destination
    ///
    /// Fails with `NotConnected` without side effects when no session is
    /// live; nothing is buffered.
    pub fn send<T: Serialize>(&self, command: AppCommand, payload: &T) -> std::result::Result<(), SendError> {
        let registry = registry::lock(&self.inner.registry);
        if !registry.is_live() {
            debug!("Not sending to {}: not connected", command);
            return Err(SendError::NotConnected);
        }
        let body = serde_json::to_string(payload).map_err(|e| SendError::Encode {
            reason: e.to_string(),
        })?;
        registry.write(&Frame::send(command.destination(), body)).map_err(|e| {
            warn!("Send to {} failed: {}", command, e);
            e
        })
    }

    pub fn send_chat_message(&self, message: &OutgoingChatMessage) -> std::result::Result<(), SendError> {
        self.send(AppCommand::SendMessage, message)
    }

    /// Plain text message with no provisional id
    pub fn send_text(
        &self,
        session_id: &str,
        sender_type: SenderType,
        content: &str,
    ) -> std::result::Result<(), SendError> {
        self.send_chat_message(&OutgoingChatMessage {
            session_id: session_id.to_string(),
            sender_type,
            sender_name: None,
            content: content.to_string(),
            message_type: MessageKind::Text,
            client_id: None,
        })
    }

    pub fn send_typing(
        &self,
        session_id: &str,
        sender_type: SenderType,
        typing: bool,
    ) -> std::result::Result<(), SendError> {
        self.send(
            AppCommand::Typing,
            &OutgoingTyping {
                session_id: session_id.to_string(),
                sender_type,
                typing,
            },
        )
    }

    pub fn mark_read(&self, session_id: &str, reader_type: SenderType) -> std::result::Result<(), SendError> {
        self.send(
            AppCommand::MarkRead,
            &MarkRead {
                session_id: session_id.to_string(),
                reader_type,
            },
        )
    }

    pub fn send_ticket_reply(
        &self,
        ticket_id: &str,
        sender_type: SenderType,
        content: &str,
    ) -> std::result::Result<(), SendError> {
        self.send(
            AppCommand::TicketReply,
            &OutgoingTicketReply {
                ticket_id: ticket_id.to_string(),
                sender_type,
                content: content.to_string(),
            },
        )
    }
}

impl std::fmt::Debug for RealtimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeService")
            .field("endpoint", &self.inner.config.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}
