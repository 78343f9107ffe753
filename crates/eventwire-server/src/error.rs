//! Server error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use eventwire_protocol::PeerId;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, thread spawn, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (invalid command name, unencodable arguments, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] eventwire_protocol::ProtocolError),

    /// The listening socket could not be bound.
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No connected peer has this identity.
    #[error("No connected peer with id {id}")]
    UnknownPeer { id: PeerId },

    /// The peer's session is already closed.
    #[error("Session {id} is closed")]
    SessionClosed { id: PeerId },
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }

    /// Creates an unknown peer error.
    pub fn unknown_peer(id: PeerId) -> Self {
        Self::UnknownPeer { id }
    }

    /// Creates a session closed error.
    pub fn session_closed(id: PeerId) -> Self {
        Self::SessionClosed { id }
    }
}
