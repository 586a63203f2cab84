//! Topic subscription registry
//!
//! Maps each [`Topic`] to its ordered handler list and, while a broker
//! session is live, the STOMP subscription id carrying it. The registry also
//! holds the session's outbound writer, so subscribe, unsubscribe and send
//! take effect synchronously on the caller's thread.
//!
//! At most one STOMP subscription exists per topic. Handlers outlive the
//! session: on reconnect [`Registry::attach`] re-issues SUBSCRIBE for every
//! topic that still has a handler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use petal_core::{Frame, InboundEvent, SendError, Topic};

/// Callback invoked for every event delivered on a topic
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub(crate) type SharedRegistry = Arc<Mutex<Registry>>;

pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

struct TopicEntry {
    /// STOMP subscription id while the session is live
    subscription_id: Option<String>,
    handlers: SmallVec<[(HandlerId, Handler); 2]>,
}

#[derive(Default)]
pub(crate) struct Registry {
    topics: HashMap<Topic, TopicEntry>,
    /// Reverse index used to route MESSAGE frames
    by_subscription: HashMap<String, Topic>,
    /// Outbound text channel of the live session
    writer: Option<mpsc::UnboundedSender<String>>,
    next_subscription: u64,
    next_handler: u64,
}

impl Registry {
    /// Register a handler, subscribing the topic on the broker if it is new
    pub(crate) fn add_handler(&mut self, topic: Topic, handler: Handler) -> HandlerId {
        self.next_handler += 1;
        let id = HandlerId(self.next_handler);

        let entry = self.topics.entry(topic.clone()).or_insert_with(|| TopicEntry {
            subscription_id: None,
            handlers: SmallVec::new(),
        });
        entry.handlers.push((id, handler));
        let needs_subscribe = entry.subscription_id.is_none();

        if needs_subscribe {
            if self.writer.is_some() {
                self.subscribe_topic(&topic);
            } else {
                debug!("Queued subscription to {} until connected", topic);
            }
        }
        id
    }

    /// Remove one handler; the last one out unsubscribes the topic
    pub(crate) fn remove_handler(&mut self, topic: &Topic, id: HandlerId) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = entry.handlers.len();
        entry.handlers.retain(|(handler, _)| *handler != id);
        let removed = entry.handlers.len() != before;

        if entry.handlers.is_empty() {
            self.remove_topic(topic);
        }
        removed
    }

    /// Drop a topic with all of its handlers
    pub(crate) fn remove_topic(&mut self, topic: &Topic) -> bool {
        let Some(entry) = self.topics.remove(topic) else {
            return false;
        };
        if let Some(subscription_id) = entry.subscription_id {
            self.by_subscription.remove(&subscription_id);
            if let Err(e) = self.write(&Frame::unsubscribe(&subscription_id)) {
                debug!("UNSUBSCRIBE {} not sent: {}", topic, e);
            }
        }
        debug!("Removed subscription to {}", topic);
        true
    }

    /// Bind a freshly handshaken session and subscribe every known topic
    pub(crate) fn attach(&mut self, writer: mpsc::UnboundedSender<String>) -> usize {
        self.writer = Some(writer);
        self.by_subscription.clear();
        let topics: Vec<Topic> = self.topics.keys().cloned().collect();
        for topic in &topics {
            if let Some(entry) = self.topics.get_mut(topic) {
                entry.subscription_id = None;
            }
            self.subscribe_topic(topic);
        }
        topics.len()
    }

    /// Forget the session; handlers stay registered for the next one
    pub(crate) fn detach(&mut self) {
        self.writer = None;
        self.by_subscription.clear();
        for entry in self.topics.values_mut() {
            entry.subscription_id = None;
        }
    }

    /// Forget the session and every subscription
    pub(crate) fn clear(&mut self) {
        self.writer = None;
        self.by_subscription.clear();
        self.topics.clear();
    }

    pub(crate) fn is_live(&self) -> bool {
        self.writer.is_some()
    }

    /// Write a frame on the live session
    pub(crate) fn write(&self, frame: &Frame) -> Result<(), SendError> {
        let writer = self.writer.as_ref().ok_or(SendError::NotConnected)?;
        writer
            .send(frame.encode())
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Resolve a MESSAGE frame to its topic and a snapshot of its handlers
    ///
    /// The `subscription` header wins; the `destination` header is the
    /// fallback for brokers that omit it.
    pub(crate) fn route(&self, frame: &Frame) -> Option<(Topic, Vec<Handler>)> {
        let topic = frame
            .subscription()
            .and_then(|id| self.by_subscription.get(id))
            .cloned()
            .or_else(|| {
                frame
                    .destination()
                    .and_then(|destination| Topic::from_destination(destination).ok())
            })?;
        let entry = self.topics.get(&topic)?;
        let handlers = entry.handlers.iter().map(|(_, h)| h.clone()).collect();
        Some((topic, handlers))
    }

    pub(crate) fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub(crate) fn handler_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, |entry| entry.handlers.len())
    }

    /// Number of topics with a live STOMP subscription
    #[cfg(test)]
    pub(crate) fn live_subscriptions(&self) -> usize {
        self.by_subscription.len()
    }

    fn subscribe_topic(&mut self, topic: &Topic) {
        self.next_subscription += 1;
        let subscription_id = format!("sub-{}", self.next_subscription);

        match self.write(&Frame::subscribe(&subscription_id, &topic.destination())) {
            Ok(()) => {
                debug!("Subscribed {} as {}", topic, subscription_id);
                self.by_subscription
                    .insert(subscription_id.clone(), topic.clone());
                if let Some(entry) = self.topics.get_mut(topic) {
                    entry.subscription_id = Some(subscription_id);
                }
            }
            Err(e) => warn!("SUBSCRIBE to {} failed: {}", topic, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_core::{frame, FrameCommand, Inbound};

    fn noop() -> Handler {
        Arc::new(|_| {})
    }

    fn sent_frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            for unit in frame::decode_all(&text).unwrap() {
                if let Inbound::Frame(frame) = unit {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    #[test]
    fn test_duplicate_subscribe_shares_one_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        registry.attach(tx);

        let topic = Topic::ChatSession("S".into());
        registry.add_handler(topic.clone(), noop());
        registry.add_handler(topic.clone(), noop());

        let frames = sent_frames(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, FrameCommand::Subscribe);
        assert_eq!(frames[0].destination(), Some("/topic/chat/S"));
        assert_eq!(registry.handler_count(&topic), 2);
        assert_eq!(registry.live_subscriptions(), 1);
    }

    #[test]
    fn test_last_handler_unsubscribes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        registry.attach(tx);

        let topic = Topic::Ticket("T-1".into());
        let first = registry.add_handler(topic.clone(), noop());
        let second = registry.add_handler(topic.clone(), noop());
        sent_frames(&mut rx);

        assert!(registry.remove_handler(&topic, first));
        assert!(sent_frames(&mut rx).is_empty());

        assert!(registry.remove_handler(&topic, second));
        let frames = sent_frames(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, FrameCommand::Unsubscribe);
        assert!(registry.topics().is_empty());
        assert!(!registry.remove_handler(&topic, second));
    }

    #[test]
    fn test_queued_until_attached() {
        let mut registry = Registry::default();
        registry.add_handler(Topic::AdminNotifications, noop());
        registry.add_handler(Topic::AdminOnlineStatus, noop());
        assert_eq!(registry.live_subscriptions(), 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(registry.attach(tx), 2);
        assert_eq!(sent_frames(&mut rx).len(), 2);
        assert_eq!(registry.live_subscriptions(), 2);
    }

    #[test]
    fn test_detach_keeps_handlers_clear_drops_them() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        registry.attach(tx);
        registry.add_handler(Topic::ChatSession("S".into()), noop());

        registry.detach();
        assert!(!registry.is_live());
        assert_eq!(registry.topics().len(), 1);
        assert_eq!(registry.live_subscriptions(), 0);
        assert_eq!(
            registry.write(&Frame::unsubscribe("sub-1")),
            Err(SendError::NotConnected)
        );

        registry.clear();
        assert!(registry.topics().is_empty());
    }

    #[test]
    fn test_route_by_subscription_then_destination() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        registry.attach(tx);
        let topic = Topic::ChatTyping("S".into());
        registry.add_handler(topic.clone(), noop());

        let by_id = Frame::new(FrameCommand::Message).with_header("subscription", "sub-1");
        assert_eq!(registry.route(&by_id).map(|(t, h)| (t, h.len())), Some((topic.clone(), 1)));

        let by_destination =
            Frame::new(FrameCommand::Message).with_header("destination", "/topic/chat/S/typing");
        assert_eq!(registry.route(&by_destination).map(|(t, _)| t), Some(topic));

        let unknown =
            Frame::new(FrameCommand::Message).with_header("destination", "/topic/chat/other");
        assert!(registry.route(&unknown).is_none());
    }
}
