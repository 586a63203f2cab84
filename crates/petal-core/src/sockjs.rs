//! SockJS WebSocket-transport framing
//!
//! The storefront broker is mounted behind SockJS. Over its raw WebSocket
//! transport every server message is prefixed with a one-letter frame type
//! and STOMP text travels inside JSON string arrays.

use serde_json::Value;
use url::Url;

use crate::errors::{ConfigError, ProtocolError};

/// One server-to-client SockJS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    /// `o` – session opened
    Open,
    /// `h` – keep-alive
    Heartbeat,
    /// `a[...]` or `m"..."` – one or more application messages
    Messages(Vec<String>),
    /// `c[code,"reason"]` – session closed by the server
    Close { code: u16, reason: String },
}

impl SockJsFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let malformed = |reason: String| ProtocolError::MalformedSockJs { reason };

        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| malformed("empty frame".to_string()))?;
        let payload = chars.as_str();

        match kind {
            'o' => Ok(SockJsFrame::Open),
            'h' => Ok(SockJsFrame::Heartbeat),
            'a' => {
                let messages: Vec<String> = serde_json::from_str(payload)
                    .map_err(|e| malformed(format!("bad message array: {e}")))?;
                Ok(SockJsFrame::Messages(messages))
            }
            'm' => {
                let message: String = serde_json::from_str(payload)
                    .map_err(|e| malformed(format!("bad message: {e}")))?;
                Ok(SockJsFrame::Messages(vec![message]))
            }
            'c' => {
                let value: Value = serde_json::from_str(payload)
                    .map_err(|e| malformed(format!("bad close frame: {e}")))?;
                let code = value
                    .get(0)
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok())
                    .ok_or_else(|| malformed("close frame without code".to_string()))?;
                let reason = value
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(SockJsFrame::Close { code, reason })
            }
            other => Err(malformed(format!("unknown frame type '{other}'"))),
        }
    }
}

/// Wrap outbound text for the SockJS WebSocket transport
pub fn encode_messages(messages: &[String]) -> String {
    // A slice of strings always serializes
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

/// Build the SockJS raw WebSocket URL `{endpoint}/{server}/{session}/websocket`
///
/// HTTP endpoints are rewritten to the matching WebSocket scheme.
pub fn websocket_url(endpoint: &str, server_id: u16, session_id: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot switch to WebSocket scheme".to_string()))?;

    let path = format!(
        "{}/{:03}/{}/websocket",
        url.path().trim_end_matches('/'),
        server_id % 1000,
        session_id
    );
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(SockJsFrame::decode("o").unwrap(), SockJsFrame::Open);
        assert_eq!(SockJsFrame::decode("h").unwrap(), SockJsFrame::Heartbeat);
        assert_eq!(
            SockJsFrame::decode(r#"c[3000,"Go away!"]"#).unwrap(),
            SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".to_string()
            }
        );
    }

    #[test]
    fn test_decode_message_frames() {
        assert_eq!(
            SockJsFrame::decode(r#"a["CONNECTED\nversion:1.2\n\n\u0000"]"#).unwrap(),
            SockJsFrame::Messages(vec!["CONNECTED\nversion:1.2\n\n\0".to_string()])
        );
        assert_eq!(
            SockJsFrame::decode(r#"m"hello""#).unwrap(),
            SockJsFrame::Messages(vec!["hello".to_string()])
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(SockJsFrame::decode("").is_err());
        assert!(SockJsFrame::decode("x").is_err());
        assert!(SockJsFrame::decode("a[not json").is_err());
        assert!(SockJsFrame::decode("c[]").is_err());
    }

    #[test]
    fn test_encode_messages() {
        let encoded = encode_messages(&["SEND\n\n{}\0".to_string()]);
        assert_eq!(encoded, r#"["SEND\n\n{}\u0000"]"#);
    }

    #[test]
    fn test_websocket_url() {
        let url = websocket_url("https://shop.example/ws/chat", 7, "abcd1234").unwrap();
        assert_eq!(url.as_str(), "wss://shop.example/ws/chat/007/abcd1234/websocket");

        let url = websocket_url("ws://localhost:8080/ws/chat/", 123, "s").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws/chat/123/s/websocket");

        assert!(websocket_url("ftp://shop.example/ws", 1, "s").is_err());
        assert!(websocket_url("not a url", 1, "s").is_err());
    }
}
