//! Inbound MESSAGE dispatch
//!
//! Frames are decoded at this boundary into [`InboundEvent`] values and fed
//! to the topic's handlers in registration order. Nothing that goes wrong
//! here escapes: undecodable payloads, unknown notification types and
//! panicking handlers are logged and the frame (or handler) is skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use petal_core::{
    AdminNotification, ChatMessage, Frame, InboundEvent, OrderNotice, PaymentNotice,
    ReviewUpdate, SessionNotice, TicketNotice,
};

use crate::registry::{self, Handler, SharedRegistry};

/// Outcome of dispatching one frame, used for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Handlers ran (the count excludes ones that panicked)
    Delivered(usize),
    /// No topic or no handlers for the frame
    Unrouted,
    /// Payload could not be decoded
    Dropped,
}

/// Route one MESSAGE frame to the handlers of its topic
pub(crate) fn dispatch(registry: &SharedRegistry, frame: &Frame) -> Dispatch {
    // Snapshot under the lock; handlers may subscribe or unsubscribe
    let Some((topic, handlers)) = registry::lock(registry).route(frame) else {
        debug!(
            "No handlers for MESSAGE on {}",
            frame.destination().unwrap_or("<no destination>")
        );
        return Dispatch::Unrouted;
    };

    let event = match InboundEvent::decode(&topic, &frame.body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping frame on {}: {}", topic, e);
            return Dispatch::Dropped;
        }
    };
    debug!(
        "Dispatching {} on {} to {} handler(s)",
        event.label(),
        topic,
        handlers.len()
    );

    let mut delivered = 0;
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_ok() {
            delivered += 1;
        } else {
            error!("Handler for {} panicked on {}", topic, event.label());
        }
    }
    Dispatch::Delivered(delivered)
}

// ----------------------------------------------------------------------------
// Admin Notification Handlers
// ----------------------------------------------------------------------------

type Callback<T> = Option<Arc<dyn Fn(&T) + Send + Sync>>;

/// Per-kind callbacks for the admin notification broadcast
///
/// Kinds without a callback are ignored.
#[derive(Default, Clone)]
pub struct AdminNotificationHandlers {
    new_session: Callback<SessionNotice>,
    new_message: Callback<ChatMessage>,
    new_ticket: Callback<TicketNotice>,
    new_order: Callback<OrderNotice>,
    order_cancelled: Callback<OrderNotice>,
    payment: Callback<PaymentNotice>,
    new_review: Callback<ReviewUpdate>,
    review_update: Callback<ReviewUpdate>,
}

impl AdminNotificationHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_new_session<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionNotice) + Send + Sync + 'static,
    {
        self.new_session = Some(Arc::new(f));
        self
    }

    pub fn on_new_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.new_message = Some(Arc::new(f));
        self
    }

    pub fn on_new_ticket<F>(mut self, f: F) -> Self
    where
        F: Fn(&TicketNotice) + Send + Sync + 'static,
    {
        self.new_ticket = Some(Arc::new(f));
        self
    }

    pub fn on_new_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&OrderNotice) + Send + Sync + 'static,
    {
        self.new_order = Some(Arc::new(f));
        self
    }

    pub fn on_order_cancelled<F>(mut self, f: F) -> Self
    where
        F: Fn(&OrderNotice) + Send + Sync + 'static,
    {
        self.order_cancelled = Some(Arc::new(f));
        self
    }

    pub fn on_payment<F>(mut self, f: F) -> Self
    where
        F: Fn(&PaymentNotice) + Send + Sync + 'static,
    {
        self.payment = Some(Arc::new(f));
        self
    }

    pub fn on_new_review<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReviewUpdate) + Send + Sync + 'static,
    {
        self.new_review = Some(Arc::new(f));
        self
    }

    pub fn on_review_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReviewUpdate) + Send + Sync + 'static,
    {
        self.review_update = Some(Arc::new(f));
        self
    }

    /// Invoke the callback registered for this notification's kind
    pub fn handle(&self, notification: &AdminNotification) {
        fn call<T>(callback: &Callback<T>, value: &T) {
            if let Some(callback) = callback {
                callback(value);
            }
        }

        match notification {
            AdminNotification::NewSession(n) => call(&self.new_session, n),
            AdminNotification::NewMessage(n) => call(&self.new_message, n),
            AdminNotification::NewTicket(n) => call(&self.new_ticket, n),
            AdminNotification::NewOrder(n) => call(&self.new_order, n),
            AdminNotification::OrderCancelled(n) => call(&self.order_cancelled, n),
            AdminNotification::Payment(n) => call(&self.payment, n),
            AdminNotification::NewReview(n) => call(&self.new_review, n),
            AdminNotification::ReviewUpdate(n) => call(&self.review_update, n),
        }
    }

    /// Wrap into a topic handler
    pub(crate) fn into_handler(self) -> Handler {
        Arc::new(move |event| {
            if let InboundEvent::Notification(notification) = event {
                self.handle(notification);
            }
        })
    }
}

impl std::fmt::Debug for AdminNotificationHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminNotificationHandlers")
            .field("new_session", &self.new_session.is_some())
            .field("new_message", &self.new_message.is_some())
            .field("new_ticket", &self.new_ticket.is_some())
            .field("new_order", &self.new_order.is_some())
            .field("order_cancelled", &self.order_cancelled.is_some())
            .field("payment", &self.payment.is_some())
            .field("new_review", &self.new_review.is_some())
            .field("review_update", &self.review_update.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use petal_core::{FrameCommand, Topic};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn live_registry() -> (SharedRegistry, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::default()));
        registry::lock(&registry).attach(tx);
        (registry, rx)
    }

    fn message(destination: &str, body: &str) -> Frame {
        Frame::new(FrameCommand::Message)
            .with_header("destination", destination)
            .with_body(body)
    }

    #[test]
    fn test_both_handlers_receive_in_order() {
        let (registry, _rx) = live_registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = seen.clone();
            registry::lock(&registry).add_handler(
                Topic::ChatSession("S".into()),
                Arc::new(move |_| seen.lock().unwrap().push(name)),
            );
        }

        let frame = message(
            "/topic/chat/S",
            r#"{"id":1,"sessionId":"S","senderType":"STAFF","content":"hi"}"#,
        );
        assert_eq!(dispatch(&registry, &frame), Dispatch::Delivered(2));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_bad_payload_dropped() {
        let (registry, _rx) = live_registry();
        registry::lock(&registry).add_handler(Topic::ChatSession("S".into()), Arc::new(|_| {}));

        assert_eq!(
            dispatch(&registry, &message("/topic/chat/S", "{not json")),
            Dispatch::Dropped
        );
        assert_eq!(
            dispatch(&registry, &message("/topic/chat/nobody", "{}")),
            Dispatch::Unrouted
        );
    }

    #[test]
    fn test_panicking_handler_isolated() {
        let (registry, _rx) = live_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry::lock(&registry)
            .add_handler(Topic::AdminOnlineStatus, Arc::new(|_| panic!("handler bug")));
        let counter = calls.clone();
        registry::lock(&registry).add_handler(
            Topic::AdminOnlineStatus,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let frame = message("/topic/admin/online-status", r#"{"userId":7,"online":true}"#);
        assert_eq!(dispatch(&registry, &frame), Dispatch::Delivered(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_admin_handlers_by_kind() {
        let (registry, _rx) = live_registry();
        let orders = Arc::new(AtomicUsize::new(0));
        let counter = orders.clone();
        let handlers = AdminNotificationHandlers::new().on_new_order(move |order| {
            assert_eq!(order.order_id, "1001");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry::lock(&registry).add_handler(Topic::AdminNotifications, handlers.into_handler());

        let order = message(
            "/topic/admin/notifications",
            r#"{"type":"NEW_ORDER","orderId":1001,"customerName":"An","totalAmount":45.5}"#,
        );
        let review = message(
            "/topic/admin/notifications",
            r#"{"type":"NEW_REVIEW","productId":3,"rating":5}"#,
        );
        let unknown = message("/topic/admin/notifications", r#"{"type":"SHIPMENT"}"#);

        assert_eq!(dispatch(&registry, &order), Dispatch::Delivered(1));
        assert_eq!(dispatch(&registry, &review), Dispatch::Delivered(1));
        assert_eq!(dispatch(&registry, &unknown), Dispatch::Dropped);
        assert_eq!(orders.load(Ordering::SeqCst), 1);
    }
}
