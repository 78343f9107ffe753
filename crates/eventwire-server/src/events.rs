//! Application hooks called by the server.

use eventwire_protocol::{PeerId, Registry};

use crate::server::ServerHandle;

/// Callbacks invoked at the server's lifecycle points.
///
/// Every method has a no-op default. Hooks run on the accept thread
/// (`on_client_connect`) or on the peer's own thread (everything else), so
/// they should not block for long.
pub trait ServerEvents: Send + Sync + 'static {
    /// Called once from [`Server::bind`](crate::Server::bind), before any
    /// peer is accepted. Register command handlers here.
    fn init(&self, server: &ServerHandle, registry: &mut Registry<PeerId>) {
        let _ = (server, registry);
    }

    /// A peer was accepted. Its read loop has not started yet, so this runs
    /// before any of its frames are dispatched.
    fn on_client_connect(&self, server: &ServerHandle, peer: PeerId) {
        let _ = (server, peer);
    }

    /// A peer's session reached `Closed`. Called exactly once per peer.
    fn on_client_disconnect(&self, server: &ServerHandle, peer: PeerId) {
        let _ = (server, peer);
    }

    /// A line that did not resolve to a handled command.
    fn on_raw_message(&self, server: &ServerHandle, peer: PeerId, line: &str) {
        let _ = (server, peer, line);
    }
}

/// Hooks that do nothing; the server still dispatches registered commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl ServerEvents for NoEvents {}
