//! Frame wire encoding and decoding.
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header values are escaped on write (`\\`, `\r`, `\n`, `\c`) and unescaped
//! on read. Keys and body are written verbatim.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::types::{Command, Frame, Headers};

/// Frame terminator byte.
pub const NUL: u8 = 0;

/// Encode a frame to its wire representation, including the NUL terminator.
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(frame));
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Append the wire representation of `frame` to `dst`.
pub fn encode_into(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(encoded_len_hint(frame));
    dst.put_slice(frame.command.as_str().as_bytes());
    dst.put_u8(b'\n');
    for (key, value) in frame.headers.iter() {
        dst.put_slice(key.as_bytes());
        dst.put_u8(b':');
        dst.put_slice(escape_header_value(value).as_bytes());
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
    dst.put_slice(&frame.body);
    dst.put_u8(NUL);
}

fn encoded_len_hint(frame: &Frame) -> usize {
    let headers: usize = frame
        .headers
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    frame.command.as_str().len() + headers + frame.body.len() + 3
}

/// Decode one raw frame (terminator already removed).
///
/// Returns `None` for empty input or when no valid command line is present.
/// Malformed header lines are skipped rather than rejected. Header keys and
/// values are trimmed, so whitespace at either end of a value is lost.
pub fn decode_frame(raw: &[u8]) -> Option<Frame> {
    if raw.is_empty() {
        return None;
    }

    let (command_line, mut rest) = match raw.iter().position(|&b| b == b'\n') {
        Some(i) => (&raw[..i], &raw[i + 1..]),
        None => (raw, &raw[raw.len()..]),
    };

    let command_line = std::str::from_utf8(trim_cr(command_line)).ok()?;
    if command_line.is_empty() {
        return None;
    }
    let command = match command_line.parse::<Command>() {
        Ok(command) => command,
        Err(e) => {
            debug!("Dropping frame: {}", e);
            return None;
        }
    };

    let mut headers = Headers::new();
    loop {
        let (line, remainder) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        rest = remainder;

        let line = trim_cr(line);
        if line.is_empty() {
            break;
        }
        parse_header_line(line, &mut headers);

        if rest.is_empty() {
            break;
        }
    }

    Some(Frame {
        command,
        headers,
        body: Bytes::copy_from_slice(rest),
    })
}

fn parse_header_line(line: &[u8], headers: &mut Headers) {
    let line = String::from_utf8_lossy(line);
    // Only the first colon separates key from value; the rest belong to the value.
    if let Some((key, value)) = line.split_once(':') {
        headers.insert(key.trim(), unescape_header_value(value.trim()));
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Escape a header value for the wire.
pub fn escape_header_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '\r', '\n', ':']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape_header_value`]. Unknown escape sequences are kept as-is.
pub fn unescape_header_value(value: &str) -> Cow<'_, str> {
    if !value.contains('\\') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_nul(bytes: &[u8]) -> &[u8] {
        assert_eq!(bytes.last(), Some(&NUL));
        &bytes[..bytes.len() - 1]
    }

    #[test]
    fn send_frame_wire_format() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/queue/x")
            .with_header("content-type", "text/plain")
            .with_body("hi");

        let encoded = encode_frame(&frame);
        assert_eq!(
            &encoded[..],
            b"SEND\ndestination:/queue/x\ncontent-type:text/plain\n\nhi\0"
        );

        let decoded = decode_frame(strip_nul(&encoded)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn escaped_values_survive_a_round_trip() {
        let frame = Frame::new(Command::Message)
            .with_header("message-id", "id:1")
            .with_header("path", "C:\\temp\\new")
            .with_header("multi", "line one\r\nline two")
            .with_header("message", "a\\cb")
            .with_body("payload");

        let encoded = encode_frame(&frame);
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("message-id:id\\c1\n"));
        assert!(text.contains("path:C\\c\\\\temp\\\\new\n"));
        assert!(text.contains("multi:line one\\r\\nline two\n"));

        let decoded = decode_frame(strip_nul(&encoded)).unwrap();
        assert_eq!(decoded.command, Command::Message);
        assert_eq!(decoded.headers, frame.headers);
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn escape_covers_all_special_characters() {
        assert_eq!(escape_header_value("a\\b\rc\nd:e"), "a\\\\b\\rc\\nd\\ce");
        assert_eq!(unescape_header_value("a\\\\b\\rc\\nd\\ce"), "a\\b\rc\nd:e");
        assert!(matches!(escape_header_value("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn unescape_is_single_pass() {
        // `\\n` is an escaped backslash followed by a literal n, not a newline.
        assert_eq!(unescape_header_value("\\\\n"), "\\n");
        assert_eq!(unescape_header_value("\\t"), "\\t");
        assert_eq!(unescape_header_value("trailing\\"), "trailing\\");
    }

    #[test]
    fn empty_input_yields_no_frame() {
        assert!(decode_frame(b"").is_none());
        assert!(decode_frame(b"\n\n").is_none());
    }

    #[test]
    fn unknown_command_yields_no_frame() {
        assert!(decode_frame(b"HELLO\nkey:value\n\n").is_none());
    }

    #[test]
    fn command_without_headers() {
        let frame = decode_frame(b"CONNECTED\n\n").unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert!(frame.headers.is_empty());
        assert!(frame.body.is_empty());

        let bare = decode_frame(b"RECEIPT").unwrap();
        assert_eq!(bare.command, Command::Receipt);
        assert!(bare.headers.is_empty());

        let with_body = decode_frame(b"MESSAGE\n\nbody").unwrap();
        assert!(with_body.headers.is_empty());
        assert_eq!(&with_body.body[..], b"body");
    }

    #[test]
    fn lines_without_colon_are_ignored() {
        let frame = decode_frame(b"MESSAGE\nmessage-id:7\ngarbage\nsubscription:s\n\n").unwrap();
        assert_eq!(frame.headers.len(), 2);
        assert_eq!(frame.header("message-id"), Some("7"));
        assert_eq!(frame.header("subscription"), Some("s"));
    }

    #[test]
    fn additional_colons_stay_in_the_value() {
        let frame = decode_frame(b"ERROR\nmessage:bad: very bad:really\n\n").unwrap();
        assert_eq!(frame.header("message"), Some("bad: very bad:really"));
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let frame = decode_frame(b"CONNECTED\r\nversion:1.1\r\nsession:abc\r\n\r\nbody").unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.1"));
        assert_eq!(frame.header("session"), Some("abc"));
        assert_eq!(&frame.body[..], b"body");
    }

    #[test]
    fn whitespace_around_header_parts_is_trimmed() {
        let frame = decode_frame(b"ERROR\n message : broker says no \n\n").unwrap();
        assert_eq!(frame.header("message"), Some("broker says no"));
    }

    #[test]
    fn surrounding_whitespace_does_not_survive_a_round_trip() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/queue/a")
            .with_header("note", "  padded\t ")
            .with_header("inner", "a b");
        let encoded = encode_frame(&frame);
        assert_eq!(
            &encoded[..],
            b"SEND\ndestination:/queue/a\nnote:  padded\t \ninner:a b\n\n\0"
        );

        let decoded = decode_frame(strip_nul(&encoded)).unwrap();
        assert_eq!(decoded.header("note"), Some("padded"));
        assert_eq!(decoded.header("inner"), Some("a b"));
        assert_ne!(decoded, frame);
    }

    #[test]
    fn duplicate_header_keeps_last_value() {
        let frame = decode_frame(b"MESSAGE\nfoo:1\nbar:2\nfoo:3\n\n").unwrap();
        let pairs: Vec<_> = frame.headers.iter().collect();
        assert_eq!(pairs, vec![("foo", "3"), ("bar", "2")]);
    }

    #[test]
    fn content_length_flags_binary_body() {
        let frame = decode_frame(b"MESSAGE\nmessage-id:1\ncontent-length:5\n\nhello").unwrap();
        assert!(frame.is_bytes_message());
        assert_eq!(&frame.body[..], b"hello");
    }
}
