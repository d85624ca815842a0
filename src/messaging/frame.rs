//! # STOMP 1.2 Frames
//!
//! Encoding and incremental decoding of STOMP frames:
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! Frames may be separated by any number of EOLs, which double as heart-beats.
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every command except
//! `CONNECT` and `CONNECTED`. When a `content-length` header is present it
//! bounds the body, so bodies may carry NUL octets; otherwise the body ends at
//! the first NUL.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::errors::{MessagingError, MessagingResult};
use crate::constants::defaults;

/// STOMP frame commands, client and server side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED frames carry raw header values
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "STOMP" => Ok(Self::Stomp),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "ACK" => Ok(Self::Ack),
            "NACK" => Ok(Self::Nack),
            "BEGIN" => Ok(Self::Begin),
            "COMMIT" => Ok(Self::Commit),
            "ABORT" => Ok(Self::Abort),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(MessagingError::protocol(format!(
                "unknown frame command '{other}'"
            ))),
        }
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header. Repeated names are kept; lookups return the first.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body and a matching `content-length` header
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.retain(|(name, _)| name != "content-length");
        self.headers
            .push(("content-length".to_string(), body.len().to_string()));
        self.body = body;
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// First value for `name`, per STOMP 1.2 repeated-header rules
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body as text, lossy; used for logging broker `ERROR` frames
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let escapes = self.command.escapes_headers();
        dst.reserve(self.encoded_len_hint());
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            if escapes {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn encoded_len_hint(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len() + 2)
            .sum();
        self.command.as_str().len() + headers + self.body.len() + 3
    }
}

/// Output of one decode step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A bare EOL between frames
    HeartBeat,
    Frame(Frame),
}

/// Incremental frame decoder over a growing read buffer
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(defaults::MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Decode the next item from `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `buf` is left untouched
    /// in that case.
    pub fn decode(&mut self, buf: &mut BytesMut) -> MessagingResult<Option<Decoded>> {
        match buf.first() {
            None => return Ok(None),
            Some(b'\n') => {
                buf.advance(1);
                return Ok(Some(Decoded::HeartBeat));
            }
            Some(b'\r') => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                if buf[1] != b'\n' {
                    return Err(MessagingError::protocol(
                        "stray carriage return between frames",
                    ));
                }
                buf.advance(2);
                return Ok(Some(Decoded::HeartBeat));
            }
            Some(_) => {}
        }

        let Some(head) = parse_head(buf)? else {
            return self.incomplete(buf);
        };

        let body_end = match content_length(&head.headers)? {
            Some(length) => {
                let end = match head.body_start.checked_add(length) {
                    Some(end) if end < self.max_frame_bytes => end,
                    _ => {
                        return Err(MessagingError::FrameTooLarge {
                            size_bytes: head.body_start.saturating_add(length).saturating_add(1),
                            limit_bytes: self.max_frame_bytes,
                        })
                    }
                };
                if buf.len() <= end {
                    return Ok(None);
                }
                if buf[end] != 0 {
                    return Err(MessagingError::protocol(format!(
                        "{} frame body is not NUL-terminated after content-length {length}",
                        head.command
                    )));
                }
                end
            }
            None => match buf[head.body_start..].iter().position(|b| *b == 0) {
                Some(offset) => head.body_start + offset,
                None => return self.incomplete(buf),
            },
        };

        let frame_bytes = buf.split_to(body_end + 1).freeze();
        let body = frame_bytes.slice(head.body_start..body_end);
        Ok(Some(Decoded::Frame(Frame {
            command: head.command,
            headers: head.headers,
            body,
        })))
    }

    fn incomplete(&self, buf: &BytesMut) -> MessagingResult<Option<Decoded>> {
        if buf.len() > self.max_frame_bytes {
            return Err(MessagingError::FrameTooLarge {
                size_bytes: buf.len(),
                limit_bytes: self.max_frame_bytes,
            });
        }
        Ok(None)
    }
}

struct FrameHead {
    command: Command,
    headers: Vec<(String, String)>,
    body_start: usize,
}

fn parse_head(buf: &[u8]) -> MessagingResult<Option<FrameHead>> {
    let mut lines: Vec<&[u8]> = Vec::new();
    let mut pos = 0;
    loop {
        let Some(offset) = buf[pos..].iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let end = pos + offset;
        let line = buf[pos..end].strip_suffix(b"\r").unwrap_or(&buf[pos..end]);
        pos = end + 1;
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }

    let (first, rest) = lines
        .split_first()
        .ok_or_else(|| MessagingError::protocol("frame without a command line"))?;
    let command: Command = utf8(first)?.parse()?;

    let mut headers = Vec::with_capacity(rest.len());
    for line in rest {
        let line = utf8(line)?;
        let (name, value) = line.split_once(':').ok_or_else(|| {
            MessagingError::protocol(format!("{command} header line without ':' ({line})"))
        })?;
        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    Ok(Some(FrameHead {
        command,
        headers,
        body_start: pos,
    }))
}

fn content_length(headers: &[(String, String)]) -> MessagingResult<Option<usize>> {
    let Some((_, value)) = headers.iter().find(|(name, _)| name == "content-length") else {
        return Ok(None);
    };
    value.trim().parse::<usize>().map(Some).map_err(|e| {
        MessagingError::protocol(format!("invalid content-length '{value}': {e}"))
    })
}

fn utf8(bytes: &[u8]) -> MessagingResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| MessagingError::protocol(format!("frame head is not UTF-8: {e}")))
}

fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '\r', '\n', ':']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn unescape(value: &str) -> MessagingResult<String> {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => unescaped.push('\r'),
            Some('n') => unescaped.push('\n'),
            Some('c') => unescaped.push(':'),
            Some('\\') => unescaped.push('\\'),
            Some(other) => {
                return Err(MessagingError::protocol(format!(
                    "undefined header escape sequence '\\{other}'"
                )))
            }
            None => return Err(MessagingError::protocol("dangling '\\' in header")),
        }
    }
    Ok(unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(decoder: &mut FrameDecoder, buf: &mut BytesMut) -> Vec<Decoded> {
        let mut out = Vec::new();
        while let Some(item) = decoder.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    fn expect_frame(decoded: Option<Decoded>) -> Frame {
        match decoded {
            Some(Decoded::Frame(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_content_length_body_may_contain_nul() {
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:in\ncontent-length:5\n\na\0b\0c\0"[..]);
        let frame = expect_frame(FrameDecoder::default().decode(&mut buf).unwrap());
        assert_eq!(frame.command(), Command::Message);
        assert_eq!(frame.header("destination"), Some("in"));
        assert_eq!(&frame.body()[..], b"a\0b\0c");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_body_without_content_length_ends_at_nul() {
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:in\n\nhello\0RECEIPT"[..]);
        let frame = expect_frame(FrameDecoder::default().decode(&mut buf).unwrap());
        assert_eq!(&frame.body()[..], b"hello");
        assert_eq!(&buf[..], b"RECEIPT");
    }

    #[test]
    fn test_heart_beats_and_crlf_lines() {
        let mut buf = BytesMut::from(&b"\n\r\nRECEIPT\r\nreceipt-id:77\r\n\r\n\0"[..]);
        let items = decode_all(&mut FrameDecoder::default(), &mut buf);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Decoded::HeartBeat);
        assert_eq!(items[1], Decoded::HeartBeat);
        match &items[2] {
            Decoded::Frame(frame) => {
                assert_eq!(frame.command(), Command::Receipt);
                assert_eq!(frame.header("receipt-id"), Some("77"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_frame_leaves_buffer_untouched() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"SEND\ndestination:out\ncontent-length:4\n\nab"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 41);

        buf.extend_from_slice(b"cd\0");
        let frame = expect_frame(decoder.decode(&mut buf).unwrap());
        assert_eq!(&frame.body()[..], b"abcd");
    }

    #[test]
    fn test_header_escaping_applies_except_on_connect() {
        let send = Frame::new(Command::Send).with_header("note", "a:b\nc\\d");
        let encoded = send.to_bytes();
        assert!(encoded.starts_with(b"SEND\nnote:a\\cb\\nc\\\\d\n"));
        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = expect_frame(FrameDecoder::default().decode(&mut buf).unwrap());
        assert_eq!(decoded.header("note"), Some("a:b\nc\\d"));

        let connect = Frame::new(Command::Connect).with_header("passcode", "pass:word");
        let encoded = connect.to_bytes();
        assert!(encoded.starts_with(b"CONNECT\npasscode:pass:word\n"));
        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = expect_frame(FrameDecoder::default().decode(&mut buf).unwrap());
        assert_eq!(decoded.header("passcode"), Some("pass:word"));
    }

    #[test]
    fn test_undefined_escape_is_a_protocol_error() {
        let mut buf = BytesMut::from(&b"MESSAGE\nbad:tab\\there\n\n\0"[..]);
        let err = FrameDecoder::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, MessagingError::Protocol { .. }));
    }

    #[test]
    fn test_repeated_header_first_value_wins() {
        let mut buf = BytesMut::from(&b"MESSAGE\nfoo:first\nfoo:second\n\n\0"[..]);
        let frame = expect_frame(FrameDecoder::default().decode(&mut buf).unwrap());
        assert_eq!(frame.header("foo"), Some("first"));
        assert_eq!(frame.headers().len(), 2);
    }

    #[test]
    fn test_with_body_replaces_content_length() {
        let frame = Frame::new(Command::Send)
            .with_header("content-length", "999")
            .with_body(Bytes::from_static(b"xyz"));
        assert_eq!(frame.header("content-length"), Some("3"));
        assert_eq!(frame.headers().len(), 1);
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:a-very-long-queue-name"[..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, MessagingError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_oversized_content_length_is_rejected() {
        let mut buf = BytesMut::from(
            &b"MESSAGE\ndestination:in\ncontent-length:18446744073709551615\n\nabc\0"[..],
        );
        let err = FrameDecoder::default().decode(&mut buf).unwrap_err();
        match err {
            MessagingError::FrameTooLarge { size_bytes, limit_bytes } => {
                assert_eq!(size_bytes, usize::MAX);
                assert_eq!(limit_bytes, defaults::MAX_FRAME_BYTES);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_content_length_without_trailing_nul() {
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:2\n\nabc\0"[..]);
        let err = FrameDecoder::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, MessagingError::Protocol { .. }));
    }

    #[test]
    fn test_unknown_command() {
        let mut buf = BytesMut::from(&b"PUBLISH\n\n\0"[..]);
        let err = FrameDecoder::default().decode(&mut buf).unwrap_err();
        assert!(err.to_string().contains("PUBLISH"));
    }

    proptest! {
        #[test]
        fn chunked_input_decodes_like_contiguous_input(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            destination in "[a-z_]{1,16}",
            split in 0usize..512,
        ) {
            let frame = Frame::new(Command::Message)
                .with_header("destination", destination.clone())
                .with_body(Bytes::from(body.clone()));
            let mut wire = BytesMut::new();
            wire.put_u8(b'\n');
            frame.encode(&mut wire);

            let split = split.min(wire.len());
            let mut decoder = FrameDecoder::default();
            let mut buf = BytesMut::from(&wire[..split]);
            let mut items = decode_all(&mut decoder, &mut buf);
            buf.extend_from_slice(&wire[split..]);
            items.extend(decode_all(&mut decoder, &mut buf));

            prop_assert!(buf.is_empty());
            prop_assert_eq!(items.len(), 2);
            prop_assert_eq!(&items[0], &Decoded::HeartBeat);
            match &items[1] {
                Decoded::Frame(decoded) => {
                    prop_assert_eq!(decoded.header("destination"), Some(destination.as_str()));
                    prop_assert_eq!(&decoded.body()[..], &body[..]);
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
