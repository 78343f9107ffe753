//! Core types: dynamic values, the argument codec, tracing setup
//!
//! Command arguments are lists of [`Value`]s. The [`codec`] module turns
//! such a list into the compact `[v1,v2,...]` text carried inside a frame
//! and back again.

pub mod codec;
mod error;
pub mod tracing;
pub mod value;

pub use codec::{decode, encode, escape, unescape};
pub use error::{CodecError, CodecResult, ConversionError};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
pub use value::{FromValue, Value};
