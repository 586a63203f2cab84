//! Connection driver task
//!
//! One task per service owns the socket and the connection state machine.
//! It reacts to API commands, socket events and four timers (handshake
//! deadline, reconnect delay, outgoing and incoming heart-beats), one event
//! at a time. Inbound MESSAGE frames are dispatched from this task, so
//! handlers never run concurrently.
//!
//! Failure handling:
//! - transport loss (socket closed, open failed, heart-beats missed,
//!   handshake timeout) schedules a reconnect after the fixed delay, up to
//!   `max_retries` times; handlers survive and are re-subscribed
//! - protocol failure (ERROR frame, rejected upgrade, bad CONNECTED) moves
//!   to `Error` and rejects pending connects without retrying

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

use petal_core::frame::{self, headers, HEARTBEAT};
use petal_core::{
    AppCommand, Frame, FrameCommand, HeartBeat, Inbound, PetalError, PresenceRegistration,
    ProtocolError, RealtimeConfig, Result, TransportError,
};

use crate::registry::{self, SharedRegistry};
use crate::router;
use crate::status::{self, ConnectionState, ConnectionStatus, SharedListeners};
use crate::transport::{Connector, SocketChannels, SocketEvent, SocketTarget};

// ----------------------------------------------------------------------------
// Connect Options
// ----------------------------------------------------------------------------

/// Credentials and identity announced when connecting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bearer token of a signed-in user or staff member
    pub token: Option<String>,
    /// Identifier of an anonymous shopper
    pub guest_id: Option<String>,
    /// Live-chat session this connection belongs to
    pub session_id: Option<String>,
    /// Signed-in user id
    pub user_id: Option<String>,
}

impl ConnectOptions {
    pub fn guest<S: Into<String>>(guest_id: S) -> Self {
        Self {
            guest_id: Some(guest_id.into()),
            ..Self::default()
        }
    }

    pub fn authenticated<S: Into<String>>(token: S) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn with_session<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// CONNECT frame carrying these credentials
    fn connect_frame(&self, config: &RealtimeConfig) -> Frame {
        let mut frame = Frame::connect(&config.stomp_host(), config.heart_beat());
        if let Some(token) = &self.token {
            frame = frame.with_header(headers::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(guest_id) = &self.guest_id {
            frame = frame.with_header("guestId", guest_id.as_str());
        }
        if let Some(session_id) = &self.session_id {
            frame = frame.with_header("sessionId", session_id.as_str());
        }
        frame
    }

    fn presence(&self) -> PresenceRegistration {
        PresenceRegistration {
            guest_id: self.guest_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Requests from service handles to the driver
pub(crate) enum Command {
    Connect {
        options: ConnectOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// State the driver shares with service handles
pub(crate) struct DriverShared {
    pub registry: SharedRegistry,
    pub listeners: SharedListeners,
    pub status: watch::Sender<ConnectionStatus>,
    pub connected: Arc<AtomicBool>,
}

type Opening = Pin<Box<dyn Future<Output = Result<SocketChannels>> + Send>>;

/// What woke the driver
enum Wake {
    Command(Command),
    Opened(Result<SocketChannels>),
    Socket(SocketEvent),
    HandshakeTimeout,
    Reconnect,
    SendHeartbeat,
    HeartbeatMissed,
}

/// Negotiated heart-beat timers of a live session
struct Heartbeat {
    send_every: Option<Duration>,
    next_send: Option<Instant>,
    /// Silence allowed before the link counts as dead
    silence_limit: Option<Duration>,
    deadline: Option<Instant>,
}

impl Heartbeat {
    fn new(send_every: Option<Duration>, expect_every: Option<Duration>, tolerance: u32) -> Self {
        // Intervals too large to schedule disable that direction
        let now = Instant::now();
        let send_every = send_every.filter(|every| now.checked_add(*every).is_some());
        let silence_limit = expect_every
            .and_then(|every| every.checked_mul(tolerance))
            .filter(|limit| now.checked_add(*limit).is_some());
        Self {
            send_every,
            next_send: send_every.and_then(|every| now.checked_add(every)),
            silence_limit,
            deadline: silence_limit.and_then(|limit| now.checked_add(limit)),
        }
    }

    fn saw_traffic(&mut self) {
        if let Some(limit) = self.silence_limit {
            self.deadline = Instant::now().checked_add(limit);
        }
    }

    fn sent(&mut self) {
        if let Some(every) = self.send_every {
            self.next_send = Instant::now().checked_add(every);
        }
    }
}

/// Live (or handshaking) socket
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

pub(crate) struct Driver {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: DriverShared,

    options: ConnectOptions,
    /// Connect callers waiting for the handshake to finish
    pending: Vec<oneshot::Sender<Result<()>>>,
    state: ConnectionState,
    retry_count: u32,
    last_error: Option<String>,
    reconnect_exhausted: bool,

    opening: Option<Opening>,
    link: Option<Link>,
    handshake_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Heartbeat>,
}

impl Driver {
    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: DriverShared,
    ) -> Self {
        Self {
            config,
            connector,
            commands,
            shared,
            options: ConnectOptions::default(),
            pending: Vec::new(),
            state: ConnectionState::Disconnected,
            retry_count: 0,
            last_error: None,
            reconnect_exhausted: false,
            opening: None,
            link: None,
            handshake_deadline: None,
            reconnect_at: None,
            heartbeat: None,
        }
    }

    /// Run until every service handle is dropped
    pub(crate) async fn run(mut self) {
        debug!("Realtime driver started ({})", self.connector.name());

        loop {
            let next_send = self.heartbeat.as_ref().and_then(|h| h.next_send);
            let deadline = self.heartbeat.as_ref().and_then(|h| h.deadline);

            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => break,
                },
                opened = poll_opening(&mut self.opening) => Wake::Opened(opened),
                event = recv_socket(&mut self.link) => Wake::Socket(event),
                _ = sleep_until_some(self.handshake_deadline) => Wake::HandshakeTimeout,
                _ = sleep_until_some(self.reconnect_at) => Wake::Reconnect,
                _ = sleep_until_some(next_send) => Wake::SendHeartbeat,
                _ = sleep_until_some(deadline) => Wake::HeartbeatMissed,
            };

            match wake {
                Wake::Command(Command::Connect { options, reply }) => self.on_connect(options, reply),
                Wake::Command(Command::Disconnect { reply }) => {
                    self.on_disconnect();
                    let _ = reply.send(());
                }
                Wake::Opened(result) => self.on_opened(result),
                Wake::Socket(event) => self.on_socket(event),
                Wake::HandshakeTimeout => {
                    let duration_ms = self.config.connect_timeout.as_millis() as u64;
                    warn!("Handshake did not complete within {}ms", duration_ms);
                    self.on_transport_failure(TransportError::Timeout { duration_ms }.into());
                }
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    info!(
                        "Reconnecting (attempt {}/{})",
                        self.retry_count, self.config.max_retries
                    );
                    self.start_attempt();
                }
                Wake::SendHeartbeat => self.send_heartbeat(),
                Wake::HeartbeatMissed => {
                    let duration_ms = self
                        .heartbeat
                        .as_ref()
                        .and_then(|h| h.silence_limit)
                        .map_or(0, |limit| limit.as_millis() as u64);
                    warn!("No traffic from broker for {}ms", duration_ms);
                    self.on_transport_failure(TransportError::HeartbeatTimeout { duration_ms }.into());
                }
            }
        }

        self.teardown();
        self.reject_pending(PetalError::ServiceStopped);
        debug!("Realtime driver stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn on_connect(&mut self, options: ConnectOptions, reply: oneshot::Sender<Result<()>>) {
        if self.state == ConnectionState::Connected {
            let _ = reply.send(Ok(()));
            return;
        }
        if self.attempt_in_flight() {
            debug!("Connect joined the in-flight attempt");
            self.pending.push(reply);
            return;
        }

        self.options = options;
        self.retry_count = 0;
        self.reconnect_exhausted = false;
        self.last_error = None;
        self.pending.push(reply);
        self.start_attempt();
    }

    fn on_disconnect(&mut self) {
        if let Some(link) = &self.link {
            if self.state == ConnectionState::Connected {
                let receipt = format!("disconnect-{}", uuid::Uuid::new_v4().simple());
                let _ = link.outbound.send(Frame::disconnect(&receipt).encode());
            }
        }
        let was_active = self.link.is_some() || self.attempt_in_flight();

        self.teardown();
        registry::lock(&self.shared.registry).clear();
        self.reject_pending(
            TransportError::Superseded {
                reason: "disconnect requested".to_string(),
            }
            .into(),
        );

        self.retry_count = 0;
        self.reconnect_exhausted = false;
        self.last_error = None;
        self.set_state(ConnectionState::Disconnected);
        if was_active {
            info!("Disconnected from {}", self.config.endpoint);
        }
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    fn attempt_in_flight(&self) -> bool {
        self.opening.is_some()
            || self.reconnect_at.is_some()
            || (self.link.is_some() && self.state == ConnectionState::Connecting)
    }

    fn start_attempt(&mut self) {
        let target = SocketTarget {
            endpoint: self.config.endpoint.clone(),
            sockjs: self.config.sockjs,
            bearer_token: self.options.token.clone(),
        };
        let connector = self.connector.clone();
        self.opening = Some(Box::pin(async move { connector.connect(&target).await }));
        self.handshake_deadline = Some(Instant::now() + self.config.connect_timeout);
        self.set_state(ConnectionState::Connecting);
        debug!("Opening socket to {}", self.config.endpoint);
    }

    fn on_opened(&mut self, result: Result<SocketChannels>) {
        self.opening = None;
        match result {
            Ok(channels) => {
                let connect = self.options.connect_frame(&self.config);
                if channels.outbound.send(connect.encode()).is_err() {
                    self.on_transport_failure(PetalError::closed("socket closed before CONNECT"));
                    return;
                }
                debug!("Socket open, CONNECT sent");
                self.link = Some(Link {
                    outbound: channels.outbound,
                    inbound: channels.inbound,
                });
            }
            Err(e @ PetalError::Protocol(_)) | Err(e @ PetalError::Config(_)) => {
                self.on_protocol_failure(e)
            }
            Err(e) => self.on_transport_failure(e),
        }
    }

    // ------------------------------------------------------------------------
    // Socket Events
    // ------------------------------------------------------------------------

    fn on_socket(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Heartbeat => self.saw_traffic(),
            SocketEvent::Closed(reason) => {
                warn!("Socket closed: {}", reason);
                self.on_transport_failure(PetalError::closed(reason));
            }
            SocketEvent::Text(text) => {
                self.saw_traffic();
                let units = match frame::decode_all(&text) {
                    Ok(units) => units,
                    Err(e) => {
                        warn!("Dropping undecodable socket message: {}", e);
                        return;
                    }
                };
                for unit in units {
                    if let Inbound::Frame(frame) = unit {
                        self.on_frame(frame);
                    }
                    // A handler may have torn the session down
                    if self.link.is_none() {
                        break;
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame.command {
            FrameCommand::Connected if self.state == ConnectionState::Connecting => {
                self.on_connected(frame)
            }
            FrameCommand::Message if self.state == ConnectionState::Connected => {
                router::dispatch(&self.shared.registry, &frame);
            }
            FrameCommand::Receipt => {
                debug!("Receipt {}", frame.header(headers::RECEIPT_ID).unwrap_or("?"));
            }
            FrameCommand::Error => {
                let message = frame.error_message();
                error!("Broker error: {}", message);
                self.on_protocol_failure(ProtocolError::BrokerError { message }.into());
            }
            other => warn!("Ignoring unexpected {} frame in state {}", other, self.state.as_str()),
        }
    }

    fn on_connected(&mut self, frame: Frame) {
        let server = match frame.header(headers::HEART_BEAT) {
            Some(value) => match value.parse::<HeartBeat>() {
                Ok(server) => server,
                Err(e) => {
                    self.on_protocol_failure(e.into());
                    return;
                }
            },
            None => HeartBeat::default(),
        };
        let Some(writer) = self.link.as_ref().map(|link| link.outbound.clone()) else {
            return;
        };

        let (send_every, expect_every) = HeartBeat::negotiate(self.config.heart_beat(), server);
        self.heartbeat = Some(Heartbeat::new(
            send_every,
            expect_every,
            self.config.heartbeat_tolerance,
        ));
        self.handshake_deadline = None;
        self.retry_count = 0;
        self.reconnect_exhausted = false;
        self.last_error = None;

        let resubscribed = registry::lock(&self.shared.registry).attach(writer);
        info!(
            "Connected to {} (STOMP {}, {} topic(s) subscribed)",
            self.config.endpoint,
            frame.header(headers::VERSION).unwrap_or("1.0"),
            resubscribed
        );

        self.register_presence();
        // Callers observe the connected state as soon as connect() resolves
        self.set_state(ConnectionState::Connected);
        for reply in self.pending.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    fn register_presence(&mut self) {
        let presence = self.options.presence();
        let body = match serde_json::to_string(&presence) {
            Ok(body) => body,
            Err(e) => {
                warn!("Presence registration not encoded: {}", e);
                return;
            }
        };
        let frame = Frame::send(AppCommand::Register.destination(), body);
        if let Err(e) = registry::lock(&self.shared.registry).write(&frame) {
            warn!("Presence registration not sent: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Heart-beats
    // ------------------------------------------------------------------------

    fn saw_traffic(&mut self) {
        if let Some(heartbeat) = &mut self.heartbeat {
            heartbeat.saw_traffic();
        }
    }

    fn send_heartbeat(&mut self) {
        if let Some(heartbeat) = &mut self.heartbeat {
            heartbeat.sent();
        }
        let sent = self
            .link
            .as_ref()
            .map(|link| link.outbound.send(HEARTBEAT.to_string()).is_ok())
            .unwrap_or(false);
        if !sent {
            self.on_transport_failure(PetalError::closed("socket closed while sending heart-beat"));
        }
    }

    // ------------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------------

    /// Socket-level loss: retry after the fixed delay until retries run out
    fn on_transport_failure(&mut self, error: PetalError) {
        self.teardown();
        self.last_error = Some(error.to_string());

        if self.retry_count >= self.config.max_retries {
            error!(
                "Giving up on {} after {} reconnect attempts: {}",
                self.config.endpoint, self.retry_count, error
            );
            self.reconnect_exhausted = true;
            self.reject_pending(
                TransportError::RetriesExhausted {
                    attempts: self.retry_count,
                }
                .into(),
            );
            self.set_state(ConnectionState::Error);
            return;
        }

        self.retry_count += 1;
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        warn!(
            "Connection lost ({}); retry {}/{} in {:?}",
            error, self.retry_count, self.config.max_retries, self.config.reconnect_delay
        );
        self.set_state(ConnectionState::Disconnected);
    }

    /// Handshake or broker failure: no automatic retry
    fn on_protocol_failure(&mut self, error: PetalError) {
        self.teardown();
        self.last_error = Some(error.to_string());
        self.retry_count = 0;
        self.reject_pending(error);
        self.set_state(ConnectionState::Error);
    }

    /// Drop the socket and every timer; handlers stay registered
    fn teardown(&mut self) {
        self.opening = None;
        self.link = None;
        self.handshake_deadline = None;
        self.reconnect_at = None;
        self.heartbeat = None;
        registry::lock(&self.shared.registry).detach();
    }

    fn reject_pending(&mut self, error: PetalError) {
        for reply in self.pending.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.shared
            .connected
            .store(state == ConnectionState::Connected, Ordering::SeqCst);

        let status = ConnectionStatus {
            state,
            retry_count: self.retry_count,
            max_retries: self.config.max_retries,
            last_error: self.last_error.clone(),
            reconnect_exhausted: self.reconnect_exhausted,
        };
        let changed = self.shared.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            debug!("Connection state -> {}", state.as_str());
            status::notify(&self.shared.listeners, &status);
        }
    }
}

// ----------------------------------------------------------------------------
// Select Helpers
// ----------------------------------------------------------------------------

async fn poll_opening(opening: &mut Option<Opening>) -> Result<SocketChannels> {
    match opening {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn recv_socket(link: &mut Option<Link>) -> SocketEvent {
    match link {
        Some(link) => link
            .inbound
            .recv()
            .await
            .unwrap_or_else(|| SocketEvent::Closed("socket task ended".to_string())),
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame_headers() {
        let config = RealtimeConfig::testing();
        let options = ConnectOptions::authenticated("tok")
            .with_session("S-9")
            .with_user("u-1");
        let frame = options.connect_frame(&config);

        assert_eq!(frame.command, FrameCommand::Connect);
        assert_eq!(frame.header("Authorization"), Some("Bearer tok"));
        assert_eq!(frame.header("sessionId"), Some("S-9"));
        assert_eq!(frame.header("guestId"), None);
        assert_eq!(frame.header("host"), Some("broker.test"));
        assert_eq!(frame.header("heart-beat"), Some("0,0"));
    }

    #[test]
    fn test_presence_payload() {
        let presence = ConnectOptions::guest("g-1").with_session("S").presence();
        assert_eq!(
            serde_json::to_value(presence).unwrap(),
            serde_json::json!({"guestId": "g-1", "sessionId": "S"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timers() {
        let mut heartbeat = Heartbeat::new(
            Some(Duration::from_secs(4)),
            Some(Duration::from_secs(4)),
            2,
        );
        let start = Instant::now();
        assert_eq!(heartbeat.next_send, Some(start + Duration::from_secs(4)));
        assert_eq!(heartbeat.deadline, Some(start + Duration::from_secs(8)));

        tokio::time::advance(Duration::from_secs(3)).await;
        heartbeat.saw_traffic();
        assert_eq!(heartbeat.deadline, Some(start + Duration::from_secs(11)));

        let silent = Heartbeat::new(None, None, 2);
        assert!(silent.next_send.is_none());
        assert!(silent.deadline.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_huge_interval_disabled() {
        let huge = Some(Duration::from_millis(u64::MAX));
        let heartbeat = Heartbeat::new(huge, huge, 2);
        assert!(heartbeat.send_every.is_none());
        assert!(heartbeat.next_send.is_none());
        assert!(heartbeat.silence_limit.is_none());
        assert!(heartbeat.deadline.is_none());
    }
}
