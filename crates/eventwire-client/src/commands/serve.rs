//! Serve command: a small chat relay in the foreground.
//!
//! Commands understood from peers:
//! - `say(text)`: relayed to everyone else as `said(name, text)`
//! - `nick(name)`: renames the peer, announced as `renamed(old, new)`
//! - `echo(text)`: sent back unchanged
//! - `who()`: answered with `peers([names...])`
//!
//! Any other line is logged and relayed as `raw(name, line)`.

use tracing::{info, warn};

use eventwire_core::{Value, values};
use eventwire_protocol::{PeerId, ProtocolResult, Registry};
use eventwire_server::{Server, ServerConfig, ServerEvents, ServerHandle, ServerResult, signals};

use crate::error::ClientResult;

/// Event hooks of the relay server.
#[derive(Debug, Default)]
pub struct Relay;

fn display_name(server: &ServerHandle, peer: PeerId) -> String {
    server
        .peer_name(peer)
        .unwrap_or_else(|| server.config().default_peer_name(peer))
}

/// Arguments of `left(id)`; `None` for an id past `i64::MAX`.
fn departure(peer: PeerId) -> Option<Vec<Value>> {
    i64::try_from(peer.get()).ok().map(|id| values![id])
}

fn register_commands(server: &ServerHandle, registry: &mut Registry<PeerId>) -> ProtocolResult<()> {
    let relay = server.clone();
    registry.register("say", move |peer: PeerId, text: String| -> ServerResult<()> {
        let name = display_name(&relay, peer);
        relay.broadcast_except(peer, "said", &values![name, text])?;
        Ok(())
    })?;

    let renames = server.clone();
    registry.register("nick", move |peer: PeerId, name: String| -> ServerResult<()> {
        let old = display_name(&renames, peer);
        renames.set_peer_name(peer, name.as_str())?;
        renames.log(&format!("{old} is now known as {name}"));
        renames.broadcast("renamed", &values![old, name])?;
        Ok(())
    })?;

    let echoes = server.clone();
    registry.register("echo", move |peer: PeerId, text: String| {
        echoes.emit(peer, "echo", &values![text])
    })?;

    let roster = server.clone();
    registry.register("who", move |peer: PeerId| {
        let names: Vec<String> = roster.peers().into_iter().map(|p| p.name).collect();
        roster.emit(peer, "peers", &[Value::from(names)])
    })?;

    // Older peers send `message` for `say`.
    registry.alias("message", "say")?;
    Ok(())
}

impl ServerEvents for Relay {
    fn init(&self, server: &ServerHandle, registry: &mut Registry<PeerId>) {
        if let Err(e) = register_commands(server, registry) {
            warn!(error = %e, "could not register relay commands");
        }
    }

    fn on_client_connect(&self, server: &ServerHandle, peer: PeerId) {
        let name = display_name(server, peer);
        server.log(&format!("{name} joined"));
        if let Err(e) = server.broadcast_except(peer, "joined", &values![name]) {
            warn!(peer = %peer, error = %e, "could not announce peer");
        }
    }

    fn on_client_disconnect(&self, server: &ServerHandle, peer: PeerId) {
        server.log(&format!("peer {peer} left"));
        let Some(args) = departure(peer) else {
            warn!(peer = %peer, "peer id does not fit an integer argument");
            return;
        };
        if let Err(e) = server.broadcast("left", &args) {
            warn!(peer = %peer, error = %e, "could not announce departure");
        }
    }

    fn on_raw_message(&self, server: &ServerHandle, peer: PeerId, line: &str) {
        let name = display_name(server, peer);
        server.log(&format!("{name}: {line}"));
        if let Err(e) = server.broadcast_except(peer, "raw", &values![name, line]) {
            warn!(peer = %peer, error = %e, "could not relay raw line");
        }
    }
}

/// Runs the relay until SIGINT/SIGTERM.
pub fn run(config: ServerConfig) -> ClientResult<()> {
    let server = Server::bind(config, Relay)?;
    let handle = server.handle();

    let stopper = handle.clone();
    signals::spawn_listener(move |_| stopper.stop())?;

    info!(addr = %handle.local_addr(), "relay running, press Ctrl+C to stop");
    server.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn departure_carries_the_peer_id() {
        assert_eq!(departure(PeerId::new(3)), Some(values![3]));
        assert_eq!(departure(PeerId::new(i64::MAX as u64)), Some(values![i64::MAX]));
        assert_eq!(departure(PeerId::new(u64::MAX)), None);
    }
}
