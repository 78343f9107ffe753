//! Event client, CLI and demo relay for eventwire.
//!
//! [`Client`] holds one connection to an eventwire server. Frames from the
//! server are dispatched on a reader thread to handlers registered in
//! [`ClientEvents::init`]; unmatched lines go to
//! [`ClientEvents::on_raw_message`].

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;

pub use cli::Cli;
pub use client::{Client, Connection};
pub use config::{ClientConfig, Settings};
pub use error::{ClientError, ClientResult};
pub use events::ClientEvents;
