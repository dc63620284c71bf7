//! Core protocol types: commands, headers, frames and the crate error.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 61613;

/// Default broker host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// STOMP protocol version 1.0
pub const V1_0: &str = "1.0";

/// STOMP protocol version 1.1
pub const V1_1: &str = "1.1";

/// Value sent in the `accept-version` header unless configured otherwise.
pub const SUPPORTED_VERSIONS: &str = "1.1,1.0";

/// Frame commands understood by the client, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    /// Wire spelling of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// A single header entry. Values are held unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Header map with unique keys that remembers insertion order, so encoding is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|h| h.key == key)
    }

    /// Set a header. An existing key keeps its position and has its value
    /// replaced; the previous value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|h| h.key == key) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
            None => {
                self.entries.push(Header { key, value });
                None
            }
        }
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|h| h.key == key)?;
        Some(self.entries.remove(index).value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|h| (h.key.as_str(), h.value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|h| h.key.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// One protocol message: command, headers and an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header (builder style).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Replace all headers (builder style).
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body (builder style).
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Whether the frame announced a length-delimited body via `content-length`.
    pub fn is_bytes_message(&self) -> bool {
        self.headers.contains_key("content-length")
    }

    /// The body split on blank lines. Most callers only need the first segment.
    pub fn body_segments(&self) -> Vec<String> {
        if self.body.is_empty() {
            return Vec::new();
        }
        let text = String::from_utf8_lossy(&self.body);
        text.split("\n\n").map(str::to_owned).collect()
    }

    /// The whole body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} headers, {} body bytes)",
            self.command,
            self.headers.len(),
            self.body.len()
        )
    }
}

/// Errors produced by the client.
#[derive(Error, Debug)]
pub enum StompError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("peer certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("operation not allowed while {0:?}")]
    InvalidState(ConnectionState),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Result type alias using StompError.
pub type Result<T> = std::result::Result<T, StompError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_wire_name() {
        for command in [
            Command::Connect,
            Command::Message,
            Command::Receipt,
            Command::Unsubscribe,
            Command::Disconnect,
        ] {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
        assert!(matches!(
            "STOMP?".parse::<Command>(),
            Err(StompError::UnknownCommand(c)) if c == "STOMP?"
        ));
    }

    #[test]
    fn headers_replace_in_place() {
        let mut headers = Headers::from([("a", "1"), ("b", "2")]);
        assert_eq!(headers.insert("a", "3"), Some("1".to_string()));
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);

        assert_eq!(headers.remove("a"), Some("3".to_string()));
        assert_eq!(headers.remove("a"), None);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn body_segments_split_on_blank_lines() {
        let frame = Frame::new(Command::Message).with_body("first\n\nsecond");
        assert_eq!(frame.body_segments(), vec!["first", "second"]);
        assert!(Frame::new(Command::Message).body_segments().is_empty());
    }

    #[test]
    fn content_length_marks_bytes_message() {
        let frame = Frame::new(Command::Message).with_header("content-length", "3");
        assert!(frame.is_bytes_message());
        assert!(!Frame::new(Command::Message).is_bytes_message());
    }
}
