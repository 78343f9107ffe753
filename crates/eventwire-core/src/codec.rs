//! Textual codec for argument lists.
//!
//! An argument list is written as a bracketed, comma-separated array:
//!
//! ```text
//! array    := "[" element ("," " "* element)* "]" | "[]"
//! element  := string | boolean | number | "null" | array
//! number   := "-"? ("0" | [1-9][0-9]*) ("." [0-9]+)? ([eE] [+-] [0-9]+)?
//! ```
//!
//! Numbers written without a decimal point or exponent decode as
//! [`Value::Int`] when they fit in an `i64`, otherwise as [`Value::Float`].
//! Floats are always encoded with a decimal point or a signed exponent so
//! the distinction survives a round trip.
//!
//! # Example
//!
//! ```rust
//! use eventwire_core::{decode, encode, values};
//!
//! let text = encode(&values!["hi", 1, 2.5, true]).unwrap();
//! assert_eq!(text, r#"["hi",1,2.5,true]"#);
//! assert_eq!(decode(&text).unwrap(), values!["hi", 1, 2.5, true]);
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(?:0|[1-9][0-9]*)(?:\.[0-9]+)?(?:[eE][+-][0-9]+)?")
        .expect("Invalid number regex")
});

/// Deepest array nesting [`decode`] accepts; the outer list is level one.
pub const MAX_DEPTH: usize = 64;

/// Encodes a list of values as `[v1,v2,...]`.
///
/// Fails when a value cannot be written in the textual form (a NaN or
/// infinite float); no partial output is produced.
pub fn encode(values: &[Value]) -> CodecResult<String> {
    let mut out = String::new();
    encode_list(values, &mut out)?;
    Ok(out)
}

fn encode_list(values: &[Value], out: &mut String) -> CodecResult<()> {
    out.push('[');
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        encode_value(value, out)?;
    }
    out.push(']');
    Ok(())
}

fn encode_value(value: &Value, out: &mut String) -> CodecResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)?),
        Value::Str(s) => {
            out.push('"');
            out.push_str(&escape(s));
            out.push('"');
        }
        Value::List(items) => encode_list(items, out)?,
    }
    Ok(())
}

/// Formats a float so that it reads back as a float.
fn format_float(f: f64) -> CodecResult<String> {
    if !f.is_finite() {
        return Err(CodecError::unencodable(format!("non-finite float {f}")));
    }
    // Debug keeps a ".0" on whole numbers and switches to exponent form for
    // large and small magnitudes, but leaves positive exponents unsigned.
    let text = format!("{f:?}");
    Ok(match text.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => text,
    })
}

/// Escapes backslash, double quote, form feed, newline, carriage return and tab.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`]. `\/` is also accepted and yields `/`.
pub fn unescape(s: &str) -> CodecResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('/') => out.push('/'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(CodecError::InvalidEscape(other)),
            None => return Err(CodecError::DanglingEscape),
        }
    }
    Ok(out)
}

/// Decodes `[v1,v2,...]` into a list of values.
///
/// The whole text must be a single array; anything after the closing
/// bracket is an error, and so is nesting deeper than [`MAX_DEPTH`].
pub fn decode(text: &str) -> CodecResult<Vec<Value>> {
    let mut parser = Parser {
        text,
        pos: 0,
        depth: 0,
    };
    let values = parser.array()?;
    if parser.pos != text.len() {
        return Err(CodecError::malformed(
            parser.pos,
            "trailing characters after array",
        ));
    }
    Ok(values)
}

/// Classifies a numeric literal that already matched the number grammar.
fn parse_number(literal: &str) -> CodecResult<Value> {
    if !literal.contains(['.', 'e', 'E'])
        && let Ok(n) = literal.parse::<i64>()
    {
        return Ok(Value::Int(n));
    }
    match literal.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Value::Float(f)),
        _ => Err(CodecError::InvalidNumber(literal.to_string())),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        self.text.get(self.pos..).unwrap_or("")
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn array(&mut self) -> CodecResult<Vec<Value>> {
        if self.peek() != Some(b'[') {
            return Err(CodecError::malformed(self.pos, "expected '['"));
        }
        if self.depth == MAX_DEPTH {
            return Err(CodecError::malformed(self.pos, "nesting too deep"));
        }
        self.depth += 1;
        let items = self.items();
        self.depth -= 1;
        items
    }

    fn items(&mut self) -> CodecResult<Vec<Value>> {
        self.pos += 1;

        let mut items = Vec::new();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            items.push(self.element()?);
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    while self.peek() == Some(b' ') {
                        self.pos += 1;
                    }
                }
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => return Err(CodecError::malformed(self.pos, "expected ',' or ']'")),
                None => return Err(CodecError::malformed(self.pos, "unterminated array")),
            }
        }
    }

    fn element(&mut self) -> CodecResult<Value> {
        match self.peek() {
            Some(b'"') => self.string().map(Value::Str),
            Some(b't') => self.keyword("true", Value::Bool(true)),
            Some(b'f') => self.keyword("false", Value::Bool(false)),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(b'n') => self.keyword("null", Value::Null),
            Some(b'[') => self.array().map(Value::List),
            Some(_) => Err(CodecError::malformed(self.pos, "unexpected character")),
            None => Err(CodecError::malformed(self.pos, "unexpected end of input")),
        }
    }

    fn keyword(&mut self, word: &'static str, value: Value) -> CodecResult<Value> {
        if self.rest().starts_with(word) {
            self.pos += word.len();
            Ok(value)
        } else {
            Err(CodecError::malformed(self.pos, "unknown literal"))
        }
    }

    fn number(&mut self) -> CodecResult<Value> {
        let literal = NUMBER_REGEX
            .find(self.rest())
            .map(|m| m.as_str())
            .ok_or_else(|| CodecError::malformed(self.pos, "invalid number"))?;
        self.pos += literal.len();
        parse_number(literal)
    }

    fn string(&mut self) -> CodecResult<String> {
        let open = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                // The escaped character is validated by `unescape`.
                Some(b'\\') => self.pos += 2,
                Some(b'"') => break,
                Some(_) => self.pos += 1,
                None => return Err(CodecError::malformed(open, "unterminated string")),
            }
        }
        let raw = self
            .text
            .get(open + 1..self.pos)
            .ok_or_else(|| CodecError::malformed(open, "invalid string boundary"))?;
        self.pos += 1;
        unescape(raw)
    }
}
