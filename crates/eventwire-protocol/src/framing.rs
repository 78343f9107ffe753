//! Newline-delimited command frames.
//!
//! Each frame is one line of text:
//!
//! ```text
//! <command>\n
//! <command> <base64 payload>\n
//! ```
//!
//! The payload is the base64 (standard alphabet, padded) encoding of the
//! codec text `[v1,v2,...]`, so it never contains a newline or a space.
//! A received line that does not fit this shape, or whose payload does not
//! decode, is surfaced as [`Inbound::Raw`] instead of an error.

use std::io::{BufRead, Read, Write};
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use tracing::debug;

use eventwire_core::{Value, codec};

use crate::MAX_LINE_LENGTH;
use crate::command::CommandName;
use crate::error::{ProtocolError, ProtocolResult};

static FRAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+)( ([A-Za-z0-9+/=]+))?$").expect("Invalid frame regex")
});

/// A command frame with its decoded arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Command name.
    pub name: String,
    /// Decoded arguments; empty when the frame had no payload.
    pub args: Vec<Value>,
}

/// Result of parsing one received line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed command frame.
    Command(Frame),
    /// A line that is not a valid frame, with trailing whitespace removed.
    Raw(String),
}

/// Builds a frame carrying arguments: `name <payload>\n`.
///
/// # Example
///
/// ```rust
/// use eventwire_core::values;
/// use eventwire_protocol::build;
///
/// assert_eq!(build("echo", &values!["hi"]).unwrap(), "echo WyJoaSJd\n");
/// ```
pub fn build(name: &str, values: &[Value]) -> ProtocolResult<String> {
    let name = CommandName::new(name)?;
    let payload = encode_payload(values)?;
    Ok(format!("{name} {payload}\n"))
}

/// Builds a frame without arguments: `name\n`.
pub fn build_bare(name: &str) -> ProtocolResult<String> {
    let name = CommandName::new(name)?;
    Ok(format!("{name}\n"))
}

/// Encodes an argument list into the transport-safe payload.
pub fn encode_payload(values: &[Value]) -> ProtocolResult<String> {
    let text = codec::encode(values)?;
    Ok(STANDARD.encode(text))
}

/// Decodes a transport payload back into an argument list.
pub fn decode_payload(payload: &str) -> ProtocolResult<Vec<Value>> {
    let bytes = STANDARD.decode(payload)?;
    let text = String::from_utf8(bytes)?;
    Ok(codec::decode(&text)?)
}

/// Parses one received line.
///
/// Never fails: anything that is not a decodable frame comes back as
/// [`Inbound::Raw`].
pub fn parse(line: &str) -> Inbound {
    let line = line.trim_end();
    let Some(captures) = FRAME_REGEX.captures(line) else {
        return Inbound::Raw(line.to_string());
    };
    let name = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let Some(payload) = captures.get(3) else {
        return Inbound::Command(Frame {
            name,
            args: Vec::new(),
        });
    };

    match decode_payload(payload.as_str()) {
        Ok(args) => Inbound::Command(Frame { name, args }),
        Err(e) => {
            debug!(command = %name, error = %e, "undecodable payload, treating line as raw");
            Inbound::Raw(line.to_string())
        }
    }
}

/// Reads newline-terminated lines from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_line_length: usize,
}

impl<R: BufRead> FrameReader<R> {
    /// Creates a new FrameReader wrapping the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Overrides the maximum accepted line length.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Reads the next line without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A final line without a
    /// terminating newline is still returned. Invalid UTF-8 is replaced
    /// rather than rejected so the line can still surface as a raw message.
    pub fn read_line(&mut self) -> ProtocolResult<Option<String>> {
        let mut buffer = Vec::new();
        let limit = (self.max_line_length + 1) as u64;
        let read = self
            .reader
            .by_ref()
            .take(limit)
            .read_until(b'\n', &mut buffer)?;

        if read == 0 {
            return Ok(None);
        }

        if buffer.last() == Some(&b'\n') {
            buffer.pop();
            if buffer.last() == Some(&b'\r') {
                buffer.pop();
            }
        } else if buffer.len() > self.max_line_length {
            return Err(ProtocolError::LineTooLong {
                max: self.max_line_length,
            });
        }

        Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
    }

    /// Returns a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this FrameReader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes frames to a byte stream, one unbuffered write per frame.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a complete line and flushes it.
    pub fn write_line(&mut self, line: &str) -> ProtocolResult<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventwire_core::values;
    use std::io::Cursor;

    fn command(name: &str, args: Vec<Value>) -> Inbound {
        Inbound::Command(Frame {
            name: name.to_string(),
            args,
        })
    }

    #[test]
    fn build_with_arguments() {
        let line = build("echo", &values!["hi"]).unwrap();
        insta::assert_snapshot!(line.trim_end(), @"echo WyJoaSJd");
    }

    #[test]
    fn build_bare_command() {
        assert_eq!(build_bare("ping").unwrap(), "ping\n");
    }

    #[test]
    fn build_rejects_bad_names() {
        assert!(matches!(
            build("bad name", &[]),
            Err(ProtocolError::InvalidCommand { .. })
        ));
        assert!(build_bare("").is_err());
    }

    #[test]
    fn build_surfaces_codec_failure() {
        let err = build("num", &values![f64::NAN]).unwrap_err();
        assert!(matches!(err, ProtocolError::Codec(_)));
    }

    #[test]
    fn frame_round_trip() {
        let cases: Vec<(&str, Vec<Value>)> = vec![
            ("echo", values!["hi"]),
            ("move_to", values![1, -2, 3.5]),
            ("chat", values!["line\nbreak", "tab\there", "quote\"", "back\\"]),
            ("nested", values![vec![vec![1, 2], vec![3]], Option::<i64>::None, true]),
            ("Empty_0", values![]),
        ];
        for (name, values) in cases {
            let line = build(name, &values).unwrap();
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1);
            assert_eq!(parse(&line), command(name, values));
        }
    }

    #[test]
    fn bare_frame_parses_to_empty_args() {
        assert_eq!(parse("ping\n"), command("ping", vec![]));
        assert_eq!(parse("ping\r\n"), command("ping", vec![]));
    }

    #[test]
    fn grammar_violation_is_raw() {
        assert_eq!(
            parse("42cmd bad!payload"),
            Inbound::Raw("42cmd bad!payload".into())
        );
        assert_eq!(parse("hello world"), Inbound::Raw("hello world".into()));
        assert_eq!(parse(""), Inbound::Raw(String::new()));
        assert_eq!(parse(" ping"), Inbound::Raw(" ping".into()));
    }

    #[test]
    fn undecodable_payload_is_raw() {
        assert_eq!(
            parse("cmd not-base64!!"),
            Inbound::Raw("cmd not-base64!!".into())
        );
        // valid alphabet, invalid length
        assert_eq!(parse("cmd abc"), Inbound::Raw("cmd abc".into()));
        // valid base64 of text that is not an array: "hello"
        assert_eq!(parse("cmd aGVsbG8="), Inbound::Raw("cmd aGVsbG8=".into()));
    }

    #[test]
    fn deeply_nested_payload_is_raw() {
        let depth = eventwire_core::codec::MAX_DEPTH + 1;
        let text = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let line = format!("deep {}", STANDARD.encode(text));
        assert_eq!(parse(&line), Inbound::Raw(line.clone()));
    }

    #[test]
    fn payload_round_trip() {
        let payload = encode_payload(&values![1, "two"]).unwrap();
        assert_eq!(decode_payload(&payload).unwrap(), values![1, "two"]);
        assert!(matches!(
            decode_payload("////"),
            Err(ProtocolError::Utf8(_))
        ));
    }

    #[test]
    fn reader_splits_lines() {
        let input = b"ping\nchat WyJoaSJd\r\nlast";
        let mut reader = FrameReader::new(Cursor::new(&input[..]));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("ping"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("chat WyJoaSJd"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("last"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn reader_empty_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.read_line().unwrap().is_none());
    }

    #[test]
    fn reader_keeps_blank_lines() {
        let mut reader = FrameReader::new(Cursor::new(b"\n\nx\n".to_vec()));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn reader_rejects_oversize_line() {
        let mut reader =
            FrameReader::new(Cursor::new(b"0123456789\n".to_vec())).with_max_line_length(4);
        assert!(matches!(
            reader.read_line(),
            Err(ProtocolError::LineTooLong { max: 4 })
        ));
    }

    #[test]
    fn reader_accepts_line_at_limit() {
        let mut reader =
            FrameReader::new(Cursor::new(b"abcd\nef\n".to_vec())).with_max_line_length(4);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("abcd"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("ef"));
    }

    #[test]
    fn writer_emits_exact_bytes() {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer.write_line(&build_bare("ping").unwrap()).unwrap();
            writer.write_line(&build("echo", &values!["hi"]).unwrap()).unwrap();
        }
        assert_eq!(buffer, b"ping\necho WyJoaSJd\n");
    }
}
