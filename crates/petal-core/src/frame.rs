//! STOMP 1.2 frame codec
//!
//! Frames travel as WebSocket text messages. One text message may carry
//! several frames and bare end-of-line heart-beats; [`decode_all`] splits
//! them apart. Header values are escaped per STOMP 1.2 except on the
//! CONNECT and CONNECTED frames, which the standard leaves raw.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use crate::errors::ProtocolError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Protocol versions offered in CONNECT
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Frame terminator
pub const NUL: char = '\0';

/// Heart-beat payload (a single end-of-line)
pub const HEARTBEAT: &str = "\n";

pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const HOST: &str = "host";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const VERSION: &str = "version";
    pub const DESTINATION: &str = "destination";
    pub const ID: &str = "id";
    pub const ACK: &str = "ack";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const MESSAGE_ID: &str = "message-id";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const MESSAGE: &str = "message";
    pub const AUTHORIZATION: &str = "Authorization";
}

// ----------------------------------------------------------------------------
// Frame Commands
// ----------------------------------------------------------------------------

/// STOMP commands this client sends or understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl FrameCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameCommand::Connect => "CONNECT",
            FrameCommand::Stomp => "STOMP",
            FrameCommand::Connected => "CONNECTED",
            FrameCommand::Send => "SEND",
            FrameCommand::Subscribe => "SUBSCRIBE",
            FrameCommand::Unsubscribe => "UNSUBSCRIBE",
            FrameCommand::Disconnect => "DISCONNECT",
            FrameCommand::Message => "MESSAGE",
            FrameCommand::Receipt => "RECEIPT",
            FrameCommand::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(
            self,
            FrameCommand::Connect | FrameCommand::Stomp | FrameCommand::Connected
        )
    }
}

impl FromStr for FrameCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => FrameCommand::Connect,
            "STOMP" => FrameCommand::Stomp,
            "CONNECTED" => FrameCommand::Connected,
            "SEND" => FrameCommand::Send,
            "SUBSCRIBE" => FrameCommand::Subscribe,
            "UNSUBSCRIBE" => FrameCommand::Unsubscribe,
            "DISCONNECT" => FrameCommand::Disconnect,
            "MESSAGE" => FrameCommand::Message,
            "RECEIPT" => FrameCommand::Receipt,
            "ERROR" => FrameCommand::Error,
            other => {
                return Err(ProtocolError::UnknownCommand {
                    command: other.to_string(),
                })
            }
        };
        Ok(command)
    }
}

impl fmt::Display for FrameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: FrameCommand,
    /// Headers in wire order; repeated names keep the first value on lookup
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace the body
    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// CONNECT frame offering STOMP 1.0–1.2 with the given heart-beat
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(FrameCommand::Connect)
            .with_header(headers::ACCEPT_VERSION, ACCEPT_VERSION)
            .with_header(headers::HOST, host)
            .with_header(headers::HEART_BEAT, heart_beat.to_string())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(FrameCommand::Subscribe)
            .with_header(headers::ID, id)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::ACK, "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(FrameCommand::Unsubscribe).with_header(headers::ID, id)
    }

    /// SEND frame carrying a JSON body
    pub fn send(destination: &str, body: String) -> Self {
        Frame::new(FrameCommand::Send)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(FrameCommand::Disconnect).with_header(headers::RECEIPT, receipt)
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.header(headers::DESTINATION)
    }

    pub fn subscription(&self) -> Option<&str> {
        self.header(headers::SUBSCRIPTION)
    }

    /// Human-readable detail of an ERROR frame
    pub fn error_message(&self) -> String {
        match (self.header(headers::MESSAGE), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{message}: {body}"),
            (None, "") => "broker sent ERROR without detail".to_string(),
            (None, body) => body.to_string(),
        }
    }

    /// Serialize to wire format, terminator included
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (key, value) in &self.headers {
            if key == headers::CONTENT_LENGTH {
                continue;
            }
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(headers::CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decode exactly one frame from the start of `input`
    ///
    /// Returns the frame and the number of bytes consumed, terminator included.
    pub fn decode_one(input: &str) -> Result<(Frame, usize), ProtocolError> {
        let malformed = |reason: &str| ProtocolError::MalformedFrame {
            reason: reason.to_string(),
        };

        let command_end = input.find('\n').ok_or_else(|| malformed("missing command line"))?;
        let command: FrameCommand = strip_cr(&input[..command_end]).parse()?;
        let escaped = command.escapes_headers();

        let mut frame = Frame::new(command);
        let mut pos = command_end + 1;

        loop {
            let line_end = input[pos..]
                .find('\n')
                .map(|offset| pos + offset)
                .ok_or_else(|| malformed("unterminated header block"))?;
            let line = strip_cr(&input[pos..line_end]);
            pos = line_end + 1;

            if line.is_empty() {
                break;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| malformed("header without ':'"))?;
            if escaped {
                frame.headers.push((unescape_header(key)?, unescape_header(value)?));
            } else {
                frame.headers.push((key.to_string(), value.to_string()));
            }
        }

        let body_end = match frame.header(headers::CONTENT_LENGTH) {
            Some(length) => {
                let length: usize = length
                    .trim()
                    .parse()
                    .map_err(|_| malformed("invalid content-length"))?;
                let (end, past_nul) = pos
                    .checked_add(length)
                    .and_then(|end| end.checked_add(1).map(|past| (end, past)))
                    .ok_or_else(|| malformed("content-length out of range"))?;
                if input.get(end..past_nul) != Some("\0") {
                    return Err(malformed("body does not match content-length"));
                }
                end
            }
            None => input[pos..]
                .find(NUL)
                .map(|offset| pos + offset)
                .ok_or_else(|| malformed("missing NUL terminator"))?,
        };

        frame.body = input
            .get(pos..body_end)
            .ok_or_else(|| malformed("body is not valid UTF-8 at content-length"))?
            .to_string();

        Ok((frame, body_end + 1))
    }
}

/// One unit extracted from a text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// End-of-line keep-alive
    Heartbeat,
    Frame(Frame),
}

/// Split a text message into its frames and heart-beats
pub fn decode_all(data: &str) -> Result<Vec<Inbound>, ProtocolError> {
    let mut out = Vec::new();
    let mut rest = data;

    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if !rest.is_empty() || out.is_empty() {
                out.push(Inbound::Heartbeat);
            }
            break;
        }
        let (frame, consumed) = Frame::decode_one(trimmed)?;
        out.push(Inbound::Frame(frame));
        rest = &trimmed[consumed..];
    }

    Ok(out)
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ProtocolError::MalformedFrame {
                    reason: format!("invalid header escape \\{}", other.unwrap_or(' ')),
                })
            }
        }
    }
    Ok(out)
}

// ----------------------------------------------------------------------------
// Heart-beating
// ----------------------------------------------------------------------------

/// `heart-beat` header value: `outgoing,incoming` in milliseconds, 0 = none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self {
            outgoing_ms: outgoing.as_millis() as u64,
            incoming_ms: incoming.as_millis() as u64,
        }
    }

    /// Settle the client's offer against the broker's CONNECTED header
    ///
    /// Returns `(send_every, expect_every)`; `None` disables that direction.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(ours.max(theirs)))
            }
        };
        (
            pick(client.outgoing_ms, server.incoming_ms),
            pick(client.incoming_ms, server.outgoing_ms),
        )
    }
}

impl FromStr for HeartBeat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedFrame {
            reason: format!("invalid heart-beat header '{s}'"),
        };
        let (outgoing, incoming) = s.split_once(',').ok_or_else(malformed)?;
        Ok(Self {
            outgoing_ms: outgoing.trim().parse().map_err(|_| malformed())?,
            incoming_ms: incoming.trim().parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_wire_format() {
        let frame = Frame::send("/app/chat.send", r#"{"content":"hi"}"#.to_string());
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/chat.send\ncontent-type:application/json\ncontent-length:16\n\n{\"content\":\"hi\"}\0"
        );
    }

    #[test]
    fn test_connect_headers_not_escaped() {
        let frame = Frame::connect("shop.example:443", HeartBeat::new(
            Duration::from_secs(4),
            Duration::from_secs(4),
        ));
        let wire = frame.encode();
        assert!(wire.contains("host:shop.example:443\n"));
        assert!(wire.contains("heart-beat:4000,4000\n"));
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(FrameCommand::Send)
            .with_header("destination", "/topic/a:b")
            .with_header("note", "line1\nline2\\");
        let wire = frame.encode();
        assert!(wire.contains("destination:/topic/a\\cb\n"));
        assert!(wire.contains("note:line1\\nline2\\\\\n"));

        let (decoded, _) = Frame::decode_one(&wire).unwrap();
        assert_eq!(decoded.destination(), Some("/topic/a:b"));
        assert_eq!(decoded.header("note"), Some("line1\nline2\\"));
    }

    #[test]
    fn test_decode_message_without_content_length() {
        let wire = "MESSAGE\r\nsubscription:sub-0\r\ndestination:/topic/chat/s1\r\nmessage-id:7\r\n\r\n{\"id\":42}\0";
        let (frame, consumed) = Frame::decode_one(wire).unwrap();
        assert_eq!(frame.command, FrameCommand::Message);
        assert_eq!(frame.subscription(), Some("sub-0"));
        assert_eq!(frame.body, "{\"id\":42}");
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_content_length_allows_embedded_nul() {
        let wire = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let (frame, _) = Frame::decode_one(wire).unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_content_length_mismatch_rejected() {
        let wire = "MESSAGE\ncontent-length:10\n\nshort\0";
        assert!(matches!(
            Frame::decode_one(wire),
            Err(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Frame::decode_one("HELLO\n\n\0"),
            Err(ProtocolError::UnknownCommand { .. })
        ));
        assert!(Frame::decode_one("MESSAGE\nno-colon\n\n\0").is_err());
        assert!(Frame::decode_one("MESSAGE\n\nbody without terminator").is_err());
        assert!(Frame::decode_one("MESSAGE\nbad:\\x\n\n\0").is_err());
        assert!(matches!(
            Frame::decode_one("MESSAGE\ncontent-length:18446744073709551615\n\nx\0"),
            Err(ProtocolError::MalformedFrame { .. })
        ));
        assert!(Frame::decode_one("MESSAGE\ncontent-length:9999\n\nx\0").is_err());
    }

    #[test]
    fn test_decode_all_splits_frames_and_heartbeats() {
        let data = "\nRECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\ndestination:/topic/x\n\nbody\0";
        let units = decode_all(data).unwrap();
        assert_eq!(units.len(), 2);
        assert!(matches!(&units[0], Inbound::Frame(f) if f.command == FrameCommand::Receipt));
        assert!(matches!(&units[1], Inbound::Frame(f) if f.body == "body"));

        assert_eq!(decode_all("\n").unwrap(), vec![Inbound::Heartbeat]);
        assert_eq!(decode_all("\r\n").unwrap(), vec![Inbound::Heartbeat]);
    }

    #[test]
    fn test_error_message() {
        let frame = Frame::new(FrameCommand::Error)
            .with_header("message", "Access denied")
            .with_body("token expired");
        assert_eq!(frame.error_message(), "Access denied: token expired");
        assert_eq!(
            Frame::new(FrameCommand::Error).error_message(),
            "broker sent ERROR without detail"
        );
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let client = HeartBeat { outgoing_ms: 4000, incoming_ms: 4000 };

        let server = HeartBeat { outgoing_ms: 10000, incoming_ms: 0 };
        assert_eq!(
            HeartBeat::negotiate(client, server),
            (None, Some(Duration::from_millis(10000)))
        );

        let server: HeartBeat = "1000,1000".parse().unwrap();
        assert_eq!(
            HeartBeat::negotiate(client, server),
            (Some(Duration::from_millis(4000)), Some(Duration::from_millis(4000)))
        );

        assert!("4000".parse::<HeartBeat>().is_err());
    }
}
