//! STOMP Frame Codec
//!
//! Minimal STOMP 1.2 framing for the broker connection: the handshake
//! pair (CONNECT/CONNECTED), subscription management
//! (SUBSCRIBE/UNSUBSCRIBE/DISCONNECT) and the inbound MESSAGE/ERROR
//! frames. One frame per WebSocket text message; a bare newline is a
//! heart-beat and carries no frame.
//!
//! Header values are escaped per the STOMP 1.2 rules (`\\`, `\n`, `\r`,
//! `\c`).

use std::fmt;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame had no command line.
    #[error("empty frame")]
    Empty,

    /// The command is not one this client speaks.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    /// A header line had no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A header value used an escape sequence outside the STOMP set.
    #[error("invalid header escape: \\{0}")]
    InvalidEscape(char),
}

/// STOMP commands understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake request.
    Connect,
    /// Server handshake acknowledgement.
    Connected,
    /// Open one topic subscription.
    Subscribe,
    /// Close one topic subscription.
    Unsubscribe,
    /// Graceful client goodbye.
    Disconnect,
    /// Broker-delivered message.
    Message,
    /// Broker-reported error; the server closes the connection after.
    Error,
    /// Acknowledgement of a receipt-requested frame.
    Receipt,
}

impl Command {
    /// The wire spelling of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Receipt => "RECEIPT",
        }
    }

    fn parse(line: &str) -> Result<Self, FrameError> {
        match line {
            "CONNECT" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "ERROR" => Ok(Self::Error),
            "RECEIPT" => Ok(Self::Receipt),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame command.
    pub command: Command,
    /// Header name/value pairs in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body, empty for everything but MESSAGE/ERROR.
    pub body: String,
}

impl Frame {
    /// Build a CONNECT frame with heart-beats disabled.
    #[must_use]
    pub fn connect(host: &str) -> Self {
        Self {
            command: Command::Connect,
            headers: vec![
                ("accept-version".to_string(), "1.2".to_string()),
                ("host".to_string(), host.to_string()),
                ("heart-beat".to_string(), "0,0".to_string()),
            ],
            body: String::new(),
        }
    }

    /// Build a SUBSCRIBE frame for one destination.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self {
            command: Command::Subscribe,
            headers: vec![
                ("id".to_string(), id.to_string()),
                ("destination".to_string(), destination.to_string()),
                ("ack".to_string(), "auto".to_string()),
            ],
            body: String::new(),
        }
    }

    /// Build an UNSUBSCRIBE frame for one subscription id.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self {
            command: Command::Unsubscribe,
            headers: vec![("id".to_string(), id.to_string())],
            body: String::new(),
        }
    }

    /// Build a DISCONNECT frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self {
            command: Command::Disconnect,
            headers: vec![],
            body: String::new(),
        }
    }

    /// First value of a header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the wire form, NUL terminator included.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(&escape(name));
            out.push(':');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one WebSocket text message.
    ///
    /// Returns `Ok(None)` for a heart-beat (a bare newline).
    ///
    /// # Errors
    ///
    /// Returns an error for an empty frame, an unknown command, or a
    /// malformed header.
    pub fn parse(text: &str) -> Result<Option<Self>, FrameError> {
        let text = text.strip_suffix('\0').unwrap_or(text);
        if text.is_empty() || text == "\n" || text == "\r\n" {
            return Ok(None);
        }

        let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command_line = lines.next().ok_or(FrameError::Empty)?;
        if command_line.is_empty() {
            return Err(FrameError::Empty);
        }
        let command = Command::parse(command_line)?;

        let mut headers = Vec::new();
        let mut body = String::new();
        let mut in_body = false;
        let mut body_lines: Vec<&str> = Vec::new();

        for line in lines {
            if in_body {
                body_lines.push(line);
            } else if line.is_empty() {
                in_body = true;
            } else {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
                headers.push((unescape(name)?, unescape(value)?));
            }
        }
        if !body_lines.is_empty() {
            body = body_lines.join("\n");
        }

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

/// Escape a header token per STOMP 1.2.
fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

/// Undo STOMP 1.2 header escaping.
fn unescape(input: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                Some('c') => out.push(':'),
                Some(other) => return Err(FrameError::InvalidEscape(other)),
                None => return Err(FrameError::InvalidEscape('\0')),
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}
