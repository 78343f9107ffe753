//! Codec and value conversion errors.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced while encoding or decoding an argument list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// A value cannot be represented in the textual form.
    #[error("cannot encode value: {reason}")]
    Unencodable { reason: String },

    /// The text does not follow the array grammar.
    #[error("malformed payload at byte {position}: {reason}")]
    Malformed { position: usize, reason: &'static str },

    /// A numeric literal matched the grammar but does not denote a finite number.
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    /// A backslash escape that the codec does not know.
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    /// A string ends in a lone backslash.
    #[error("dangling escape at end of string")]
    DanglingEscape,
}

impl CodecError {
    /// Creates an unencodable value error.
    pub fn unencodable(reason: impl Into<String>) -> Self {
        Self::Unencodable {
            reason: reason.into(),
        }
    }

    /// Creates a malformed payload error.
    pub fn malformed(position: usize, reason: &'static str) -> Self {
        Self::Malformed { position, reason }
    }
}

/// A decoded value does not have the type a handler parameter asks for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, found {found}")]
pub struct ConversionError {
    /// Name of the requested type.
    pub expected: &'static str,
    /// Type name of the value that was supplied.
    pub found: &'static str,
}

impl ConversionError {
    /// Creates a conversion error.
    pub fn new(expected: &'static str, found: &'static str) -> Self {
        Self { expected, found }
    }
}
