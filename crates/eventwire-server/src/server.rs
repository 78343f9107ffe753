//! Accept loop, per-peer read loops and the handle used to talk to peers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use eventwire_core::Value;
use eventwire_protocol::{
    Disconnect, DispatchOutcome, Frame, Inbound, PeerId, Registry, build, build_bare, read_frames,
};

use crate::config::ServerConfig;
use crate::directory::{PeerDirectory, PeerInfo};
use crate::error::{ServerError, ServerResult};
use crate::events::ServerEvents;
use crate::meter::{RequestMeter, RequestRate};
use crate::session::Session;

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before the next accept after `consecutive_failures` failed ones.
fn accept_backoff(consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(consecutive_failures - 1);
    ACCEPT_BACKOFF_INITIAL
        .saturating_mul(factor)
        .min(ACCEPT_BACKOFF_MAX)
}

struct Shared {
    config: ServerConfig,
    local_addr: SocketAddr,
    directory: PeerDirectory,
    meter: Arc<dyn RequestMeter>,
    next_id: AtomicU64,
    stopping: AtomicBool,
}

/// Cheap, cloneable handle to a running server.
///
/// Handlers and event hooks use it to reach peers. It holds no reference to
/// the command registry or the hooks themselves.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.shared.local_addr)
            .field("peers", &self.shared.directory.len())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The request meter fed by every peer's read loop.
    pub fn meter(&self) -> &Arc<dyn RequestMeter> {
        &self.shared.meter
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.shared.directory
    }

    /// Sends `name` with `args` to one peer.
    pub fn emit(&self, peer: PeerId, name: &str, args: &[Value]) -> ServerResult<()> {
        let line = build(name, args)?;
        self.shared.directory.send_to(peer, &line)
    }

    /// Sends `name` without arguments to one peer.
    pub fn emit_bare(&self, peer: PeerId, name: &str) -> ServerResult<()> {
        let line = build_bare(name)?;
        self.shared.directory.send_to(peer, &line)
    }

    /// Sends `name` with `args` to every peer. Returns the delivery count.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> ServerResult<usize> {
        let line = build(name, args)?;
        Ok(self.shared.directory.broadcast(&line, None))
    }

    pub fn broadcast_bare(&self, name: &str) -> ServerResult<usize> {
        let line = build_bare(name)?;
        Ok(self.shared.directory.broadcast(&line, None))
    }

    /// Sends `name` with `args` to every peer but `exclude`.
    pub fn broadcast_except(
        &self,
        exclude: PeerId,
        name: &str,
        args: &[Value],
    ) -> ServerResult<usize> {
        let line = build(name, args)?;
        Ok(self.shared.directory.broadcast(&line, Some(exclude)))
    }

    pub fn broadcast_except_bare(&self, exclude: PeerId, name: &str) -> ServerResult<usize> {
        let line = build_bare(name)?;
        Ok(self.shared.directory.broadcast(&line, Some(exclude)))
    }

    /// Writes a line to one peer verbatim. A missing newline is added.
    pub fn send_line(&self, peer: PeerId, line: &str) -> ServerResult<()> {
        if line.ends_with('\n') {
            self.shared.directory.send_to(peer, line)
        } else {
            self.shared.directory.send_to(peer, &format!("{line}\n"))
        }
    }

    /// Display name of a connected peer.
    pub fn peer_name(&self, peer: PeerId) -> Option<String> {
        self.shared.directory.get(peer).map(|session| session.name())
    }

    pub fn set_peer_name(&self, peer: PeerId, name: impl Into<String>) -> ServerResult<()> {
        if self.shared.directory.rename(peer, name) {
            Ok(())
        } else {
            Err(ServerError::unknown_peer(peer))
        }
    }

    /// Connected peers in connection order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.directory.list()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.directory.len()
    }

    /// Closes one peer's connection. Its disconnect hook still fires.
    pub fn kick(&self, peer: PeerId) -> ServerResult<()> {
        let session = self
            .shared
            .directory
            .get(peer)
            .ok_or_else(|| ServerError::unknown_peer(peer))?;
        info!(peer = %peer, "kicking peer");
        session.close();
        Ok(())
    }

    /// Application log line, tagged `server`.
    pub fn log(&self, text: &str) {
        info!(tag = "server", "{text}");
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Stops accepting and closes every session.
    ///
    /// Idempotent. The accept loop is woken by a throwaway connection to the
    /// listening address.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(addr = %self.shared.local_addr, "stopping server");

        let wake = wake_addr(self.shared.local_addr);
        if let Err(e) = TcpStream::connect(wake) {
            debug!(addr = %wake, error = %e, "could not wake accept loop");
        }
        self.shared.directory.close_all();
    }
}

// A listener bound to the unspecified address is reachable on loopback.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    }
}

/// A bound, not yet running, event server.
pub struct Server {
    listener: TcpListener,
    handle: ServerHandle,
    registry: Registry<PeerId>,
    events: Arc<dyn ServerEvents>,
}

impl Server {
    /// Binds the listener and runs the `init` hook.
    pub fn bind(config: ServerConfig, events: impl ServerEvents) -> ServerResult<Self> {
        let meter = Arc::new(RequestRate::new(config.rate_history));
        Self::bind_with_meter(config, events, meter)
    }

    /// Like [`Server::bind`] with a caller-supplied request meter.
    pub fn bind_with_meter(
        config: ServerConfig,
        events: impl ServerEvents,
        meter: Arc<dyn RequestMeter>,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .map_err(|e| ServerError::bind(config.bind_addr, e))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");

        let handle = ServerHandle {
            shared: Arc::new(Shared {
                config,
                local_addr,
                directory: PeerDirectory::new(),
                meter,
                next_id: AtomicU64::new(0),
                stopping: AtomicBool::new(false),
            }),
        };

        let mut registry = Registry::new();
        events.init(&handle, &mut registry);
        debug!(commands = ?registry.commands(), "server commands registered");

        Ok(Self {
            listener,
            handle,
            registry,
            events: Arc::new(events),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Command table, for handlers added outside the `init` hook.
    pub fn registry_mut(&mut self) -> &mut Registry<PeerId> {
        &mut self.registry
    }

    /// Runs the accept loop on the current thread until [`ServerHandle::stop`].
    pub fn run(self) -> ServerResult<()> {
        let Self {
            listener,
            handle,
            registry,
            events,
        } = self;
        let registry = Arc::new(registry);

        let mut failures = 0u32;
        for stream in listener.incoming() {
            if handle.is_stopping() {
                break;
            }
            match stream {
                Ok(stream) => {
                    failures = 0;
                    admit(&handle, &registry, &events, stream);
                }
                Err(e) => {
                    // Out of descriptors fails every accept until a peer leaves.
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    warn!(error = %e, failures, ?pause, "accept failed");
                    thread::sleep(pause);
                }
            }
        }

        handle.shared.directory.close_all();
        info!("server stopped");
        Ok(())
    }

    /// Runs the accept loop on a background thread.
    pub fn spawn(self) -> ServerResult<JoinHandle<ServerResult<()>>> {
        let handle = thread::Builder::new()
            .name("eventwire-accept".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }
}

fn admit(
    handle: &ServerHandle,
    registry: &Arc<Registry<PeerId>>,
    events: &Arc<dyn ServerEvents>,
    stream: TcpStream,
) {
    let shared = &handle.shared;
    let id = PeerId::new(shared.next_id.fetch_add(1, Ordering::SeqCst));
    let name = shared.config.default_peer_name(id);

    let session = match Session::new(id, name, stream) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            warn!(peer = %id, error = %e, "could not set up session");
            return;
        }
    };
    let reader = match session.reader(shared.config.max_line_length) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(peer = %id, error = %e, "could not set up session");
            session.close();
            return;
        }
    };

    info!(peer = %id, addr = ?session.peer_addr(), "peer connected");
    shared.directory.add(Arc::clone(&session));
    events.on_client_connect(handle, id);
    if handle.is_stopping() {
        session.close();
    }

    let peer = PeerThread {
        handle: handle.clone(),
        registry: Arc::clone(registry),
        events: Arc::clone(events),
        session: Arc::clone(&session),
    };
    let spawned = thread::Builder::new()
        .name(format!("eventwire-peer-{id}"))
        .spawn(move || peer.run(reader));
    if let Err(e) = spawned {
        error!(peer = %id, error = %e, "could not spawn peer thread");
        session.close();
        teardown(handle, events.as_ref(), &session);
    }
}

struct PeerThread {
    handle: ServerHandle,
    registry: Arc<Registry<PeerId>>,
    events: Arc<dyn ServerEvents>,
    session: Arc<Session>,
}

impl PeerThread {
    fn run(self, reader: eventwire_protocol::FrameReader<std::io::BufReader<TcpStream>>) {
        let id = self.session.id();
        let end = read_frames(reader, |inbound, raw| {
            self.handle.shared.meter.record();
            match inbound {
                Inbound::Command(Frame { name, args }) => {
                    let outcome = self.registry.dispatch(id, &name, args);
                    if !outcome.is_handled() {
                        if outcome == DispatchOutcome::Unknown {
                            debug!(peer = %id, command = %name, "no handler registered");
                        }
                        self.events.on_raw_message(&self.handle, id, raw);
                    }
                }
                Inbound::Raw(line) => self.events.on_raw_message(&self.handle, id, &line),
            }
        });

        match end {
            Disconnect::EndOfStream => debug!(peer = %id, "peer closed the connection"),
            Disconnect::Error(e) => debug!(peer = %id, error = %e, "peer read failed"),
        }
        teardown(&self.handle, self.events.as_ref(), &self.session);
    }
}

fn teardown(handle: &ServerHandle, events: &dyn ServerEvents, session: &Session) {
    if !session.lifecycle().begin_close() {
        return;
    }
    let id = session.id();
    session.close();
    handle.shared.directory.remove(id);
    session.lifecycle().finish_close();
    info!(peer = %id, "peer disconnected");
    events.on_client_disconnect(handle, id);
}
