//! In-memory broker for tests
//!
//! [`MockConnector`] plays the broker side of each socket the driver opens.
//! It records every frame the client sends, answers CONNECT according to a
//! per-connection script, and lets a test push MESSAGE frames or drop the
//! socket.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::debug;

use petal_core::frame::{self, headers};
use petal_core::{Frame, FrameCommand, HeartBeat, Inbound, PetalError, ProtocolError, Result};

use crate::transport::{socket_pair, Connector, SocketChannels, SocketEvent, SocketTarget};

/// How the mock broker treats one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Open the socket and answer CONNECT with CONNECTED
    Accept,
    /// Open the socket and answer CONNECT with an ERROR frame
    ErrorFrame(String),
    /// Refuse the HTTP upgrade (as a 401/403 would)
    RejectUpgrade(String),
    /// Fail to open the socket at all
    Unreachable(String),
    /// Open the socket but never answer CONNECT
    Silent,
}

struct MockLink {
    to_client: Option<tokio::sync::mpsc::UnboundedSender<SocketEvent>>,
    /// Live subscriptions: id -> destination
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockBehavior>,
    server_heart_beat: HeartBeat,
    targets: Vec<SocketTarget>,
    links: Vec<MockLink>,
    frames: Vec<Frame>,
    heartbeats: usize,
    next_message_id: u64,
}

impl MockState {
    fn live_link(&mut self) -> Option<&mut MockLink> {
        self.links
            .iter_mut()
            .rev()
            .find(|link| link.to_client.is_some())
    }
}

/// Scriptable in-memory broker connector
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue behaviours for the next connection attempts; unscripted attempts accept
    pub fn script<I: IntoIterator<Item = MockBehavior>>(&self, behaviors: I) -> &Self {
        self.state().script.extend(behaviors);
        self
    }

    /// Heart-beat header the broker puts in CONNECTED
    pub fn with_server_heart_beat(&self, heart_beat: HeartBeat) -> &Self {
        self.state().server_heart_beat = heart_beat;
        self
    }

    /// Connection attempts seen so far, successful or not
    pub fn attempts(&self) -> usize {
        self.state().targets.len()
    }

    pub fn targets(&self) -> Vec<SocketTarget> {
        self.state().targets.clone()
    }

    /// Sockets opened so far
    pub fn sockets_opened(&self) -> usize {
        self.state().links.len()
    }

    pub fn is_open(&self) -> bool {
        self.state().live_link().is_some()
    }

    /// Every frame received from the client, in order
    pub fn frames(&self) -> Vec<Frame> {
        self.state().frames.clone()
    }

    pub fn frames_of(&self, command: FrameCommand) -> Vec<Frame> {
        self.state()
            .frames
            .iter()
            .filter(|frame| frame.command == command)
            .cloned()
            .collect()
    }

    /// Client heart-beats received
    pub fn heartbeats(&self) -> usize {
        self.state().heartbeats
    }

    /// Destinations subscribed on the current socket, sorted
    pub fn live_destinations(&self) -> Vec<String> {
        let mut state = self.state();
        let mut destinations: Vec<String> = state
            .live_link()
            .map(|link| link.subscriptions.values().cloned().collect())
            .unwrap_or_default();
        destinations.sort();
        destinations
    }

    /// Publish a MESSAGE on a destination
    ///
    /// Carries the `subscription` header when the client subscribed the
    /// destination on the current socket, as a real broker would; otherwise
    /// it is delivered with the destination alone.
    pub fn publish(&self, destination: &str, body: &str) -> bool {
        let mut state = self.state();
        state.next_message_id += 1;
        let message_id = format!("msg-{}", state.next_message_id);
        let Some(link) = state.live_link() else {
            return false;
        };

        let mut frame = Frame::new(FrameCommand::Message)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::MESSAGE_ID, message_id)
            .with_header(headers::CONTENT_TYPE, "application/json");
        if let Some((id, _)) = link.subscriptions.iter().find(|(_, d)| d.as_str() == destination) {
            frame = frame.with_header(headers::SUBSCRIPTION, id.as_str());
        }
        let frame = frame.with_body(body);
        send_to_client(link, SocketEvent::Text(frame.encode()))
    }

    /// Send raw text to the client as-is
    pub fn push_raw(&self, text: &str) -> bool {
        let mut state = self.state();
        match state.live_link() {
            Some(link) => send_to_client(link, SocketEvent::Text(text.to_string())),
            None => false,
        }
    }

    /// Send an ERROR frame on the current socket
    pub fn send_error(&self, message: &str) -> bool {
        let frame = Frame::new(FrameCommand::Error).with_header(headers::MESSAGE, message);
        self.push_raw(&frame.encode())
    }

    /// Drop the current socket as a network failure would
    pub fn drop_connection(&self) -> bool {
        let mut state = self.state();
        let Some(link) = state.live_link() else {
            return false;
        };
        if let Some(to_client) = link.to_client.take() {
            let _ = to_client.send(SocketEvent::Closed("connection reset".to_string()));
        }
        link.subscriptions.clear();
        true
    }
}

fn send_to_client(link: &mut MockLink, event: SocketEvent) -> bool {
    match &link.to_client {
        Some(to_client) => to_client.send(event).is_ok(),
        None => false,
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &SocketTarget) -> Result<SocketChannels> {
        let behavior = {
            let mut state = self.state();
            state.targets.push(target.clone());
            state.script.pop_front().unwrap_or(MockBehavior::Accept)
        };
        debug!("Mock broker connection attempt: {:?}", behavior);

        match &behavior {
            MockBehavior::RejectUpgrade(reason) => {
                return Err(ProtocolError::HandshakeRejected {
                    reason: reason.clone(),
                }
                .into())
            }
            MockBehavior::Unreachable(reason) => {
                return Err(PetalError::connect_failed(&target.endpoint, reason.as_str()))
            }
            _ => {}
        }

        let (channels, mut peer) = socket_pair();
        let index = {
            let mut state = self.state();
            state.links.push(MockLink {
                to_client: Some(peer.to_client.clone()),
                subscriptions: HashMap::new(),
            });
            state.links.len() - 1
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(text) = peer.from_client.recv().await {
                let Ok(units) = frame::decode_all(&text) else {
                    continue;
                };
                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                for unit in units {
                    let frame = match unit {
                        Inbound::Heartbeat => {
                            guard.heartbeats += 1;
                            continue;
                        }
                        Inbound::Frame(frame) => frame,
                    };
                    let server_heart_beat = guard.server_heart_beat;
                    let link = &mut guard.links[index];
                    match frame.command {
                        FrameCommand::Connect => {
                            let reply = match &behavior {
                                MockBehavior::Accept => Some(
                                    Frame::new(FrameCommand::Connected)
                                        .with_header(headers::VERSION, "1.2")
                                        .with_header(headers::HEART_BEAT, server_heart_beat.to_string()),
                                ),
                                MockBehavior::ErrorFrame(message) => Some(
                                    Frame::new(FrameCommand::Error)
                                        .with_header(headers::MESSAGE, message.as_str()),
                                ),
                                _ => None,
                            };
                            if let Some(reply) = reply {
                                send_to_client(link, SocketEvent::Text(reply.encode()));
                            }
                        }
                        FrameCommand::Subscribe => {
                            if let (Some(id), Some(destination)) =
                                (frame.header(headers::ID), frame.destination())
                            {
                                link.subscriptions
                                    .insert(id.to_string(), destination.to_string());
                            }
                        }
                        FrameCommand::Unsubscribe => {
                            if let Some(id) = frame.header(headers::ID) {
                                link.subscriptions.remove(id);
                            }
                        }
                        FrameCommand::Disconnect => {
                            if let Some(receipt) = frame.header(headers::RECEIPT) {
                                let reply = Frame::new(FrameCommand::Receipt)
                                    .with_header(headers::RECEIPT_ID, receipt);
                                send_to_client(link, SocketEvent::Text(reply.encode()));
                            }
                        }
                        _ => {}
                    }
                    guard.frames.push(frame);
                }
            }
            // Client released the socket
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(link) = guard.links.get_mut(index) {
                link.to_client = None;
                link.subscriptions.clear();
            }
        });

        Ok(channels)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockConnector")
            .field("attempts", &state.targets.len())
            .field("frames", &state.frames.len())
            .finish()
    }
}
