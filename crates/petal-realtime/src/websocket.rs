//! WebSocket connector built on tokio-tungstenite
//!
//! Opens the socket (optionally through SockJS's raw WebSocket transport)
//! and spawns a pump task that shuttles text between the socket and the
//! driver's channels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use petal_core::sockjs::{self, SockJsFrame};
use petal_core::{ConfigError, PetalError, ProtocolError, Result};

use crate::transport::{socket_pair, Connector, SocketChannels, SocketEvent, SocketPeer, SocketTarget};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ----------------------------------------------------------------------------
// WebSocket Connector
// ----------------------------------------------------------------------------

/// Production connector speaking WebSocket to the broker
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &SocketTarget) -> Result<SocketChannels> {
        let url = socket_url(target)?;
        debug!("Opening WebSocket to {}", url);

        let mut request = url.as_str().into_client_request().map_err(|e| {
            PetalError::connect_failed(url.as_str(), format!("invalid request: {e}"))
        })?;
        if let Some(token) = &target.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "bearer_token",
                    reason: e.to_string(),
                }
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let stream = match connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                return Err(match status {
                    401 => ProtocolError::HandshakeRejected {
                        reason: "Unauthorized: WebSocket requires valid credentials".to_string(),
                    }
                    .into(),
                    403 => ProtocolError::HandshakeRejected {
                        reason: "Forbidden: access to WebSocket denied".to_string(),
                    }
                    .into(),
                    code => PetalError::connect_failed(
                        url.as_str(),
                        format!("HTTP {code} during upgrade"),
                    ),
                });
            }
            Err(e) => return Err(PetalError::connect_failed(url.as_str(), e.to_string())),
        };

        info!("WebSocket open to {}", target.endpoint);
        let (channels, peer) = socket_pair();
        tokio::spawn(pump(stream, peer, target.sockjs));
        Ok(channels)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Resolve the URL to upgrade, adding the SockJS server/session path
fn socket_url(target: &SocketTarget) -> Result<Url> {
    if target.sockjs {
        let nonce = Uuid::new_v4();
        let bytes = nonce.as_bytes();
        let server_id = u16::from_le_bytes([bytes[0], bytes[1]]) % 1000;
        let session_id = nonce.simple().to_string();
        return Ok(sockjs::websocket_url(&target.endpoint, server_id, &session_id)?);
    }
    Url::parse(&target.endpoint).map_err(|e| {
        ConfigError::InvalidEndpoint {
            endpoint: target.endpoint.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

// ----------------------------------------------------------------------------
// Socket Pump
// ----------------------------------------------------------------------------

/// Move text between the socket and the driver until either side goes away
async fn pump(stream: Stream, mut peer: SocketPeer, sockjs: bool) {
    let (mut sink, mut source) = stream.split();
    // SockJS accepts client messages only after its open frame
    let mut opened = !sockjs;
    let mut backlog: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            outbound = peer.from_client.recv() => {
                let Some(text) = outbound else {
                    debug!("Client released the socket, closing");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if !opened {
                    backlog.push(text);
                    continue;
                }
                let wire = if sockjs { sockjs::encode_messages(&[text]) } else { text };
                if let Err(e) = sink.send(Message::Text(wire)).await {
                    let _ = peer.to_client.send(SocketEvent::Closed(e.to_string()));
                    break;
                }
            }
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) if sockjs => {
                        match SockJsFrame::decode(&text) {
                            Ok(SockJsFrame::Open) => {
                                opened = true;
                                if !backlog.is_empty() {
                                    let wire = sockjs::encode_messages(&backlog);
                                    backlog.clear();
                                    if let Err(e) = sink.send(Message::Text(wire)).await {
                                        let _ = peer.to_client.send(SocketEvent::Closed(e.to_string()));
                                        break;
                                    }
                                }
                            }
                            Ok(SockJsFrame::Heartbeat) => {
                                let _ = peer.to_client.send(SocketEvent::Heartbeat);
                            }
                            Ok(SockJsFrame::Messages(messages)) => {
                                for message in messages {
                                    let _ = peer.to_client.send(SocketEvent::Text(message));
                                }
                            }
                            Ok(SockJsFrame::Close { code, reason }) => {
                                let _ = peer.to_client.send(SocketEvent::Closed(format!("SockJS close {code}: {reason}")));
                                break;
                            }
                            Err(e) => warn!("Dropping SockJS frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let _ = peer.to_client.send(SocketEvent::Text(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Dropping {} byte binary message", data.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = peer.to_client.send(SocketEvent::Closed(reason));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = peer.to_client.send(SocketEvent::Closed(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = peer.to_client.send(SocketEvent::Closed("stream ended".to_string()));
                        break;
                    }
                }
            }
        }
    }
}
