//! Connection lifecycle shared by client and server sessions.
//!
//! ```text
//! Connecting ──connect ok──▶ Connected ──read ends / close──▶ Disconnecting ──▶ Closed
//!      │                                                                          ▲
//!      └────────────────────────────connect failed────────────────────────────────┘
//! ```
//!
//! A server-side session is created straight into `Connected`. A client
//! starts in `Connecting` and may return there from `Closed` on reconnect.

use std::io::BufRead;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::error::ProtocolError;
use crate::framing::{FrameReader, Inbound, parse};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the socket.
    Connecting,
    /// Socket open, read loop running.
    Connected,
    /// Read loop ended; the socket is being shut down.
    Disconnecting,
    /// Terminal state. `send` fails.
    Closed,
}

/// Thread-safe holder of a [`SessionState`] with the allowed transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<SessionState>,
}

impl Lifecycle {
    /// Creates a lifecycle in the given state.
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.lock()
    }

    /// True while the state is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// True once the state is `Closed`.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// `Closed` → `Connecting`. Returns false from any other state.
    pub fn begin_connect(&self) -> bool {
        self.transition(SessionState::Closed, SessionState::Connecting)
    }

    /// `Connecting` → `Connected`.
    pub fn mark_connected(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Connected)
    }

    /// `Connecting` → `Closed` after a failed connect attempt.
    pub fn mark_connect_failed(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Closed)
    }

    /// `Connected` → `Disconnecting`.
    ///
    /// Only the first caller gets `true`; that caller owns the teardown and
    /// the single disconnect notification.
    pub fn begin_close(&self) -> bool {
        self.transition(SessionState::Connected, SessionState::Disconnecting)
    }

    /// `Disconnecting` → `Closed`.
    pub fn finish_close(&self) -> bool {
        self.transition(SessionState::Disconnecting, SessionState::Closed)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.lock();
        if *state == from {
            trace!(?from, ?to, "session state transition");
            *state = to;
            true
        } else {
            false
        }
    }
}

/// Why a read loop stopped.
#[derive(Debug)]
pub enum Disconnect {
    /// The peer closed its side (or our own shutdown did).
    EndOfStream,
    /// Reading failed.
    Error(ProtocolError),
}

/// Reads lines until the stream ends, handing each parsed line to `on_frame`.
///
/// Frames are delivered strictly in arrival order on the calling thread.
/// The raw line (trailing whitespace removed) accompanies the parse result
/// so the caller can fall back to raw-message handling after a failed
/// dispatch.
pub fn read_frames<R, F>(mut reader: FrameReader<R>, mut on_frame: F) -> Disconnect
where
    R: BufRead,
    F: FnMut(Inbound, &str),
{
    loop {
        match reader.read_line() {
            Ok(Some(line)) => {
                let inbound = parse(&line);
                on_frame(inbound, line.trim_end());
            }
            Ok(None) => {
                debug!("end of stream");
                return Disconnect::EndOfStream;
            }
            Err(e) => {
                debug!(error = %e, "read failed");
                return Disconnect::Error(e);
            }
        }
    }
}
