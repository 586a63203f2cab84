//! Live-chat conversation with optimistic sends
//!
//! [`Conversation`] binds one chat session to the service: it keeps a
//! [`ConversationView`] fed from the session topic and shows outbound
//! messages immediately under a provisional id. When the socket is down,
//! sends go through the request/response [`MessageApi`] if one is attached.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use petal_core::{
    Applied, ChatMessage, ConversationView, DisplayedMessage, MessageKind, OutgoingChatMessage,
    PetalError, ProvisionalId, Result, SendError, SenderType,
};

use crate::service::{RealtimeService, SubscriptionHandle};

// ----------------------------------------------------------------------------
// Request/Response Fallback
// ----------------------------------------------------------------------------

/// Request/response message API used when the socket cannot carry a send
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Persist a message and return the server's copy
    async fn send_message(&self, message: &OutgoingChatMessage) -> Result<ChatMessage>;

    /// Messages of a session, oldest first
    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>>;
}

/// A send that reached neither the socket nor the fallback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Message not sent: {error}")]
pub struct SendFailure {
    /// Text to restore into the input so the user can retry
    pub draft: String,
    pub error: PetalError,
}

// ----------------------------------------------------------------------------
// Conversation
// ----------------------------------------------------------------------------

type SharedView = Arc<Mutex<ConversationView>>;

fn lock(view: &SharedView) -> MutexGuard<'_, ConversationView> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One chat session as seen by a participant
pub struct Conversation {
    service: RealtimeService,
    session_id: String,
    sender_type: SenderType,
    sender_name: Option<String>,
    view: SharedView,
    fallback: Option<Arc<dyn MessageApi>>,
    subscription: Option<SubscriptionHandle>,
}

impl Conversation {
    /// Join a session's message topic as the given sender class
    pub fn open(service: &RealtimeService, session_id: &str, sender_type: SenderType) -> Self {
        let view: SharedView = Arc::new(Mutex::new(ConversationView::new(session_id)));

        let feed = view.clone();
        let subscription = service.subscribe_to_session(session_id, move |message| {
            match lock(&feed).apply_confirmed(message.clone()) {
                Applied::Replaced(provisional) => {
                    debug!("Confirmed {} as {:?}", provisional, message.id)
                }
                Applied::Duplicate => debug!("Duplicate delivery of {:?}", message.id),
                Applied::Appended | Applied::Ignored => {}
            }
        });

        Self {
            service: service.clone(),
            session_id: session_id.to_string(),
            sender_type,
            sender_name: None,
            view,
            fallback: None,
            subscription: Some(subscription),
        }
    }

    pub fn with_sender_name<S: Into<String>>(mut self, name: S) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_fallback(mut self, api: Arc<dyn MessageApi>) -> Self {
        self.fallback = Some(api);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of the displayed messages
    pub fn messages(&self) -> Vec<DisplayedMessage> {
        lock(&self.view).messages().to_vec()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.view).pending_count()
    }

    /// Run a closure against the current view
    pub fn with_view<R>(&self, f: impl FnOnce(&ConversationView) -> R) -> R {
        f(&lock(&self.view))
    }

    /// Seed the view from the request/response history
    pub async fn load_history(&self) -> Result<usize> {
        let Some(api) = self.fallback.clone() else {
            return Ok(0);
        };
        let history = api.history(&self.session_id).await?;
        let added = lock(&self.view).load_history(history);
        debug!("Loaded {} history message(s) for {}", added, self.session_id);
        Ok(added)
    }

    /// Show a message immediately and send it
    ///
    /// Over the socket the provisional entry stays until the server echoes
    /// the message on the session topic. Through the fallback it is replaced
    /// by the returned copy straight away. On failure the entry is removed
    /// and the draft handed back.
    pub async fn send_text(&self, content: &str) -> std::result::Result<ProvisionalId, SendFailure> {
        let provisional = lock(&self.view).push_provisional(
            self.sender_type,
            self.sender_name.clone(),
            content.to_string(),
        );
        let message = OutgoingChatMessage {
            session_id: self.session_id.clone(),
            sender_type: self.sender_type,
            sender_name: self.sender_name.clone(),
            content: content.to_string(),
            message_type: MessageKind::Text,
            client_id: Some(provisional.to_string()),
        };

        let error = match self.service.send_chat_message(&message) {
            Ok(()) => return Ok(provisional),
            Err(e @ (SendError::NotConnected | SendError::ChannelClosed)) => e,
            Err(e) => return Err(self.fail(&provisional, e.into())),
        };

        let Some(api) = self.fallback.clone() else {
            return Err(self.fail(&provisional, error.into()));
        };
        info!("Realtime send unavailable ({}), using fallback", error);
        match api.send_message(&message).await {
            Ok(confirmed) => {
                lock(&self.view).apply_confirmed(confirmed);
                Ok(provisional)
            }
            Err(e) => Err(self.fail(
                &provisional,
                SendError::Fallback {
                    reason: e.to_string(),
                }
                .into(),
            )),
        }
    }

    /// Tell the other side whether we are typing
    pub fn set_typing(&self, typing: bool) -> std::result::Result<(), SendError> {
        self.service
            .send_typing(&self.session_id, self.sender_type, typing)
    }

    pub fn mark_read(&self) -> std::result::Result<(), SendError> {
        self.service.mark_read(&self.session_id, self.sender_type)
    }

    /// Leave the session topic; the view stays readable
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn fail(&self, provisional: &ProvisionalId, error: PetalError) -> SendFailure {
        warn!("Send of {} failed: {}", provisional, error);
        let draft = lock(&self.view).fail(provisional).unwrap_or_default();
        SendFailure { draft, error }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("session_id", &self.session_id)
            .field("sender_type", &self.sender_type)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
