//! Event server for the eventwire protocol.
//!
//! The server accepts TCP connections, gives each peer a sequential
//! [`PeerId`](eventwire_protocol::PeerId) and runs its read loop on a
//! dedicated thread. Frames naming a registered command are dispatched to
//! their handler with the peer's identity as first argument; everything
//! else reaches [`ServerEvents::on_raw_message`].
//!
//! # Example
//!
//! ```rust,no_run
//! use eventwire_protocol::{PeerId, Registry};
//! use eventwire_server::{Server, ServerConfig, ServerEvents, ServerHandle};
//!
//! struct Echo;
//!
//! impl ServerEvents for Echo {
//!     fn init(&self, server: &ServerHandle, registry: &mut Registry<PeerId>) {
//!         let server = server.clone();
//!         registry
//!             .register("echo", move |peer: PeerId, text: String| {
//!                 server.emit(peer, "echo", &[text.into()])
//!             })
//!             .unwrap();
//!     }
//! }
//!
//! let server = Server::bind(ServerConfig::default(), Echo).unwrap();
//! server.run().unwrap();
//! ```

mod config;
mod directory;
mod error;
mod events;
mod meter;
mod server;
mod session;
pub mod signals;

pub use config::{DEFAULT_PORT, DEFAULT_RATE_HISTORY, ServerConfig};
pub use directory::{PeerDirectory, PeerInfo};
pub use error::{ServerError, ServerResult};
pub use events::{NoEvents, ServerEvents};
pub use meter::{RequestMeter, RequestRate};
pub use server::{Server, ServerHandle};
pub use session::Session;
