//! Server-side connection sessions.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use eventwire_protocol::{FrameReader, FrameWriter, Lifecycle, PeerId, SessionState};

use crate::error::{ServerError, ServerResult};

/// One accepted connection.
///
/// The session owns the write half of the socket behind its own lock; the
/// read half is handed to the peer thread by [`Session::reader`].
#[derive(Debug)]
pub struct Session {
    id: PeerId,
    peer_addr: Option<SocketAddr>,
    name: Mutex<String>,
    stream: TcpStream,
    writer: Mutex<FrameWriter<TcpStream>>,
    lifecycle: Lifecycle,
}

impl Session {
    /// Wraps an accepted stream. The session starts `Connected`.
    pub fn new(id: PeerId, name: impl Into<String>, stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr().ok();
        let writer = FrameWriter::new(stream.try_clone()?);
        Ok(Self {
            id,
            peer_addr,
            name: Mutex::new(name.into()),
            stream,
            writer: Mutex::new(writer),
            lifecycle: Lifecycle::new(SessionState::Connected),
        })
    }

    /// A line reader over a clone of the socket.
    pub fn reader(&self, max_line_length: usize) -> io::Result<FrameReader<BufReader<TcpStream>>> {
        let stream = self.stream.try_clone()?;
        Ok(FrameReader::new(BufReader::new(stream)).with_max_line_length(max_line_length))
    }

    /// Peer identity.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address, if the socket still knew it at accept time.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Current display name.
    pub fn name(&self) -> String {
        self.name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the display name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn writer(&self) -> MutexGuard<'_, FrameWriter<TcpStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one complete line.
    ///
    /// A write failure is returned as is; it does not change the session
    /// state. The read loop notices the broken socket on its own.
    pub fn send(&self, line: &str) -> ServerResult<()> {
        if self.lifecycle.is_closed() {
            return Err(ServerError::session_closed(self.id));
        }
        trace!(peer = %self.id, bytes = line.len(), "send");
        self.writer().write_line(line)?;
        Ok(())
    }

    /// Shuts the socket down in both directions.
    ///
    /// The peer thread's pending read returns, and the read loop finishes
    /// the teardown.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            debug!(peer = %self.id, error = %e, "socket shutdown failed");
        }
    }
}
