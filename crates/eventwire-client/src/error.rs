//! Client error types.

use std::io;

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The host name did not resolve to any address.
    #[error("could not resolve {addr}")]
    Resolve { addr: String },

    /// Connection to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The session is not connected.
    #[error("not connected")]
    NotConnected,

    /// Protocol/framing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] eventwire_protocol::ProtocolError),

    /// Error from the embedded server.
    #[error("server error: {0}")]
    Server(#[from] eventwire_server::ServerError),

    /// User input that cannot be turned into a frame.
    #[error("invalid input: {0}")]
    Input(String),
}

impl ClientError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }
}
