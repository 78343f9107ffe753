//! Line framing, command dispatch and connection lifecycle for eventwire.
//!
//! # Protocol Overview
//!
//! Peers exchange newline-terminated frames over a TCP stream:
//!
//! ```text
//! <command>\n
//! <command> <base64 of "[v1,v2,...]">\n
//! ```
//!
//! A command name matches `[A-Za-z0-9_]+`. The optional payload is the
//! argument list encoded by [`eventwire_core::codec`], then base64 encoded.
//! Lines that do not follow this shape are delivered to the application as
//! raw messages.
//!
//! # Example
//!
//! ```rust
//! use eventwire_core::values;
//! use eventwire_protocol::{build, parse, Frame, Inbound};
//!
//! let line = build("echo", &values!["hi"]).unwrap();
//! assert_eq!(line, "echo WyJoaSJd\n");
//! assert_eq!(
//!     parse(&line),
//!     Inbound::Command(Frame { name: "echo".into(), args: values!["hi"] })
//! );
//! ```

mod command;
mod error;
mod framing;
mod lifecycle;
mod registry;

pub use command::{CommandName, PeerId};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{
    FrameReader, FrameWriter, Frame, Inbound, build, build_bare, decode_payload, encode_payload,
    parse,
};
pub use lifecycle::{Disconnect, Lifecycle, SessionState, read_frames};
pub use registry::{
    ArgumentError, DispatchOutcome, HandlerError, HandlerReturn, Injected, IntoHandler, Registry,
};

/// Maximum length of a single received line (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
