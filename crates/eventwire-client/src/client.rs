//! The event client: one connection to a server, with its own read loop.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use eventwire_core::Value;
use eventwire_protocol::{
    Disconnect, Frame, FrameReader, FrameWriter, Inbound, Lifecycle, Registry, SessionState,
    build, build_bare, read_frames,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvents;

// The shutdown handle and the writer have separate locks so that a write
// blocked on a full socket buffer never holds up `disconnect`.
#[derive(Debug)]
struct ConnectionInner {
    lifecycle: Lifecycle,
    stream: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<FrameWriter<TcpStream>>>,
}

/// Sending half of a client, shared with handlers and hooks.
///
/// Cloning is cheap. A `Connection` never keeps the command registry or
/// the hooks alive.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    fn new() -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                lifecycle: Lifecycle::new(SessionState::Connecting),
                stream: Mutex::new(None),
                writer: Mutex::new(None),
            }),
        }
    }

    fn stream(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.inner.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, Option<FrameWriter<TcpStream>>> {
        self.inner.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, stream: TcpStream, writer: FrameWriter<TcpStream>) {
        *self.stream() = Some(stream);
        *self.writer() = Some(writer);
    }

    // Shut down first: that fails any write still in progress, which
    // releases the writer lock.
    fn detach(&self) {
        if let Some(stream) = self.stream().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.writer().take();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lifecycle.is_connected()
    }

    /// Writes one complete line.
    ///
    /// Fails with [`ClientError::NotConnected`] when there is no open
    /// socket. A write error is returned without changing the state.
    pub fn send(&self, line: &str) -> ClientResult<()> {
        if self.inner.lifecycle.is_closed() {
            return Err(ClientError::NotConnected);
        }
        let mut writer = self.writer();
        let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
        trace!(bytes = line.len(), "send");
        writer.write_line(line)?;
        Ok(())
    }

    /// Sends `name` with `args`.
    pub fn emit(&self, name: &str, args: &[Value]) -> ClientResult<()> {
        let line = build(name, args)?;
        self.send(&line)
    }

    /// Sends `name` without arguments.
    pub fn emit_bare(&self, name: &str) -> ClientResult<()> {
        let line = build_bare(name)?;
        self.send(&line)
    }

    /// Shuts the socket down. The read loop then reports the disconnect.
    ///
    /// Never waits for a send in progress; that send fails instead.
    pub fn disconnect(&self) {
        if let Some(stream) = self.stream().as_ref()
            && let Err(e) = stream.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            debug!(error = %e, "socket shutdown failed");
        }
    }

    /// Application log line, tagged `client`.
    pub fn log(&self, text: &str) {
        info!(tag = "client", "{text}");
    }
}

/// A client session.
///
/// Created in `Connecting`; nothing touches the network until
/// [`Client::connect`].
pub struct Client {
    config: ClientConfig,
    connection: Connection,
    registry: Arc<Registry<()>>,
    events: Arc<dyn ClientEvents>,
    connecting: Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address())
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Client {
    /// Creates a client and runs the `init` hook.
    pub fn new(config: ClientConfig, events: impl ClientEvents) -> Self {
        let connection = Connection::new();
        let mut registry = Registry::new();
        events.init(&connection, &mut registry);
        debug!(commands = ?registry.commands(), "client commands registered");

        Self {
            config,
            connection,
            registry: Arc::new(registry),
            events: Arc::new(events),
            connecting: Mutex::new(()),
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A cloneable handle for sending.
    pub fn connection(&self) -> Connection {
        self.connection.clone()
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Opens the connection.
    ///
    /// Returns `Ok(false)` without doing anything if the session is already
    /// connected (or still tearing down). On failure the session is `Closed`,
    /// `on_connect_fail` has run and the error is returned; no retry happens.
    pub fn connect(&self) -> ClientResult<bool> {
        let _attempt = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        let lifecycle = &self.connection.inner.lifecycle;
        match lifecycle.state() {
            SessionState::Connecting => {}
            SessionState::Closed => {
                if !lifecycle.begin_connect() {
                    return Ok(false);
                }
            }
            SessionState::Connected | SessionState::Disconnecting => return Ok(false),
        }

        self.join_reader();
        debug!(addr = %self.config.address(), "connecting");
        match self.open() {
            Ok(stream) => {
                self.start(stream)?;
                Ok(true)
            }
            Err(e) => Err(self.fail_connect(e)),
        }
    }

    /// Same as [`Client::connect`]; reads better after a disconnect.
    pub fn reconnect(&self) -> ClientResult<bool> {
        self.connect()
    }

    fn open(&self) -> ClientResult<TcpStream> {
        let address = self.config.address();
        let addrs: Vec<SocketAddr> = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|_| ClientError::Resolve {
                addr: address.clone(),
            })?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            let attempt = match self.config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(source) => ClientError::Connect {
                addr: address,
                source,
            },
            None => ClientError::Resolve { addr: address },
        })
    }

    fn start(&self, stream: TcpStream) -> ClientResult<()> {
        self.start_with(stream, |run| {
            thread::Builder::new()
                .name("eventwire-client-reader".to_string())
                .spawn(run)
        })
    }

    // The reader thread is parked until the session is `Connected`, so
    // `on_connect` always comes before anything it reads.
    fn start_with<S>(&self, stream: TcpStream, spawn: S) -> ClientResult<()>
    where
        S: FnOnce(Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let lifecycle = &self.connection.inner.lifecycle;
        let setup = || -> io::Result<_> {
            let reader = FrameReader::new(BufReader::new(stream.try_clone()?))
                .with_max_line_length(self.config.max_line_length);
            let writer = FrameWriter::new(stream.try_clone()?);
            Ok((reader, writer))
        };
        let (reader, writer) = match setup() {
            Ok(parts) => parts,
            Err(e) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(self.fail_connect(e.into()));
            }
        };
        self.connection.attach(stream, writer);

        let reader_loop = ReaderLoop {
            connection: self.connection.clone(),
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
        };
        let (go, parked) = mpsc::channel::<()>();
        let handle = match spawn(Box::new(move || {
            if parked.recv().is_ok() {
                reader_loop.run(reader);
            }
        })) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "could not spawn reader thread");
                self.connection.detach();
                return Err(self.fail_connect(e.into()));
            }
        };

        lifecycle.mark_connected();
        info!(addr = %self.config.address(), "connected");
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        if go.send(()).is_err() {
            warn!("reader thread ended before starting");
        }
        Ok(())
    }

    fn fail_connect(&self, error: ClientError) -> ClientError {
        warn!(addr = %self.config.address(), error = %error, "connect failed");
        self.connection.inner.lifecycle.mark_connect_failed();
        self.events.on_connect_fail(&self.connection, &error);
        error
    }

    // A finished reader from a previous connection is reaped before a new one starts.
    fn join_reader(&self) {
        let handle = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("reader thread panicked");
        }
    }

    /// Blocks until the current read loop has ended.
    pub fn wait(&self) {
        self.join_reader();
    }

    pub fn send(&self, line: &str) -> ClientResult<()> {
        self.connection.send(line)
    }

    pub fn emit(&self, name: &str, args: &[Value]) -> ClientResult<()> {
        self.connection.emit(name, args)
    }

    pub fn emit_bare(&self, name: &str) -> ClientResult<()> {
        self.connection.emit_bare(name)
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn log(&self, text: &str) {
        self.connection.log(text);
    }
}

struct ReaderLoop {
    connection: Connection,
    registry: Arc<Registry<()>>,
    events: Arc<dyn ClientEvents>,
}

impl ReaderLoop {
    fn run(self, reader: FrameReader<BufReader<TcpStream>>) {
        self.events.on_connect(&self.connection);
        let end = read_frames(reader, |inbound, raw| match inbound {
            Inbound::Command(Frame { name, args }) => {
                if !self.registry.dispatch((), &name, args).is_handled() {
                    self.events.on_raw_message(&self.connection, raw);
                }
            }
            Inbound::Raw(line) => self.events.on_raw_message(&self.connection, &line),
        });

        match end {
            Disconnect::EndOfStream => debug!("server closed the connection"),
            Disconnect::Error(e) => debug!(error = %e, "read failed"),
        }
        teardown(&self.connection, self.events.as_ref());
    }
}

fn teardown(connection: &Connection, events: &dyn ClientEvents) {
    let lifecycle = &connection.inner.lifecycle;
    if !lifecycle.begin_close() {
        return;
    }
    connection.detach();
    lifecycle.finish_close();
    info!("disconnected");
    events.on_disconnect(connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Event {
        Connected,
        ConnectFailed,
        Disconnected,
        Raw(String),
        Greet(String, i64),
    }

    struct Recorder {
        tx: Mutex<Sender<Event>>,
        connect_delay: Duration,
    }

    impl Recorder {
        fn new() -> (Self, Receiver<Event>) {
            Self::with_connect_delay(Duration::ZERO)
        }

        fn with_connect_delay(connect_delay: Duration) -> (Self, Receiver<Event>) {
            let (tx, rx) = mpsc::channel();
            let recorder = Self {
                tx: Mutex::new(tx),
                connect_delay,
            };
            (recorder, rx)
        }

        fn push(&self, event: Event) {
            let _ = self.tx.lock().unwrap().send(event);
        }
    }

    impl ClientEvents for Recorder {
        fn init(&self, _connection: &Connection, registry: &mut Registry<()>) {
            let tx = Mutex::new(self.tx.lock().unwrap().clone());
            registry
                .register("greet", move |name: String, times: i64| {
                    let _ = tx.lock().unwrap().send(Event::Greet(name, times));
                })
                .unwrap();
        }

        fn on_connect(&self, _connection: &Connection) {
            thread::sleep(self.connect_delay);
            self.push(Event::Connected);
        }

        fn on_connect_fail(&self, _connection: &Connection, _error: &ClientError) {
            self.push(Event::ConnectFailed);
        }

        fn on_disconnect(&self, _connection: &Connection) {
            self.push(Event::Disconnected);
        }

        fn on_raw_message(&self, _connection: &Connection, line: &str) {
            self.push(Event::Raw(line.to_string()));
        }
    }

    fn next(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn listener() -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ClientConfig::new("127.0.0.1", port))
    }

    #[test]
    fn starts_connecting_and_refuses_to_send() {
        let (recorder, _rx) = Recorder::new();
        let client = Client::new(ClientConfig::default(), recorder);
        assert_eq!(client.state(), SessionState::Connecting);
        assert!(matches!(client.send("x\n"), Err(ClientError::NotConnected)));
    }

    #[test]
    fn connect_failure_closes_without_retry() {
        let (listener, config) = listener();
        drop(listener);
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);

        let err = client.connect().unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(next(&rx), Event::ConnectFailed);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn dispatch_raw_and_disconnect() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);

        assert!(client.connect().unwrap());
        assert_eq!(next(&rx), Event::Connected);
        assert!(!client.reconnect().unwrap());

        let (mut server, _) = listener.accept().unwrap();
        // greet("bob", 2) encoded as ["bob",2]
        server.write_all(b"greet WyJib2IiLDJd\n").unwrap();
        server.write_all(b"greet\n").unwrap();
        server.write_all(b"welcome!\n").unwrap();
        assert_eq!(next(&rx), Event::Greet("bob".into(), 2));
        assert_eq!(next(&rx), Event::Raw("greet".into()));
        assert_eq!(next(&rx), Event::Raw("welcome!".into()));

        client.emit("hello", &[Value::from("hi")]).unwrap();
        let mut line = String::new();
        BufReader::new(&server).read_line(&mut line).unwrap();
        assert_eq!(line, "hello WyJoaSJd\n");

        drop(server);
        assert_eq!(next(&rx), Event::Disconnected);
        client.wait();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(matches!(client.emit_bare("late"), Err(ClientError::NotConnected)));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn reconnect_after_disconnect() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);

        assert!(client.connect().unwrap());
        assert_eq!(next(&rx), Event::Connected);
        let (_first, _) = listener.accept().unwrap();

        client.disconnect();
        assert_eq!(next(&rx), Event::Disconnected);
        client.wait();

        assert!(client.reconnect().unwrap());
        assert_eq!(next(&rx), Event::Connected);
        let (second, _) = listener.accept().unwrap();

        client.emit_bare("again").unwrap();
        let mut line = String::new();
        BufReader::new(&second).read_line(&mut line).unwrap();
        assert_eq!(line, "again\n");

        client.disconnect();
        assert_eq!(next(&rx), Event::Disconnected);
    }

    #[test]
    fn unencodable_emit_is_rejected_locally() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);
        client.connect().unwrap();
        assert_eq!(next(&rx), Event::Connected);
        let (server, _) = listener.accept().unwrap();

        let err = client.emit("bad", &[Value::Float(f64::NAN)]).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(client.is_connected());

        client.emit_bare("ok").unwrap();
        let mut line = String::new();
        BufReader::new(&server).read_line(&mut line).unwrap();
        assert_eq!(line, "ok\n");
        client.disconnect();
    }

    #[test]
    fn connect_hook_precedes_disconnect_when_server_hangs_up() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::with_connect_delay(Duration::from_millis(50));
        let client = Client::new(config, recorder);
        let server = thread::spawn(move || drop(listener.accept().unwrap()));

        assert!(client.connect().unwrap());
        server.join().unwrap();
        assert_eq!(next(&rx), Event::Connected);
        assert_eq!(next(&rx), Event::Disconnected);
        client.wait();
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn disconnect_interrupts_blocked_send() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);
        client.connect().unwrap();
        assert_eq!(next(&rx), Event::Connected);
        // Accepted but never read, so the send buffers fill up.
        let (_silent, _) = listener.accept().unwrap();

        let connection = client.connection();
        let sender = thread::spawn(move || {
            let line = format!("{}\n", "x".repeat(1 << 20));
            while connection.send(&line).is_ok() {}
        });
        thread::sleep(Duration::from_millis(200));

        let (done_tx, done_rx) = mpsc::channel();
        let connection = client.connection();
        thread::spawn(move || {
            connection.disconnect();
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        assert_eq!(next(&rx), Event::Disconnected);
        sender.join().unwrap();
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn reader_spawn_failure_reports_connect_fail() {
        let (listener, config) = listener();
        let (recorder, rx) = Recorder::new();
        let client = Client::new(config, recorder);
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let err = client
            .start_with(stream, |_| Err(io::Error::other("no threads left")))
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(next(&rx), Event::ConnectFailed);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(matches!(client.send("x\n"), Err(ClientError::NotConnected)));
    }
}
