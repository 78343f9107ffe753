//! Unix signal handling for the server.
//!
//! SIGINT and SIGTERM trigger a graceful shutdown. The server itself runs on
//! blocking threads, so the listener gets its own thread with a small
//! single-threaded tokio runtime.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

/// Signals that ask the server to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT or Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Waits for the first shutdown signal.
#[cfg(unix)]
pub async fn wait_for_shutdown() -> io::Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok(Signal::Terminate),
        _ = sigint.recv() => Ok(Signal::Interrupt),
    }
}

/// Waits for Ctrl+C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> io::Result<Signal> {
    tokio::signal::ctrl_c().await?;
    Ok(Signal::Interrupt)
}

/// Spawns a thread that calls `on_shutdown` once a shutdown signal arrives.
///
/// Typically `on_shutdown` is `move |_| handle.stop()`.
pub fn spawn_listener<F>(on_shutdown: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Signal) + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("eventwire-signals".to_string())
        .spawn(move || {
            match runtime.block_on(wait_for_shutdown()) {
                Ok(signal) => {
                    info!(%signal, "received signal, initiating shutdown");
                    on_shutdown(signal);
                }
                Err(e) => warn!(error = %e, "could not install signal handlers"),
            }
            debug!("signal listener stopped");
        })
}
