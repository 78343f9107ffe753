//! Protocol error types.

use thiserror::Error;

use eventwire_core::CodecError;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Command name does not match `[A-Za-z0-9_]+`.
    #[error("invalid command name '{name}': must match [A-Za-z0-9_]+")]
    InvalidCommand { name: String },

    /// Argument list could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Payload is not valid base64.
    #[error("invalid payload encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded payload is not UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A received line exceeds the maximum length.
    #[error("line too long: more than {max} bytes")]
    LineTooLong { max: usize },

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Creates an invalid command error.
    pub fn invalid_command(name: impl Into<String>) -> Self {
        Self::InvalidCommand { name: name.into() }
    }
}
