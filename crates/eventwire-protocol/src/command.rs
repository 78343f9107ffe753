//! Command names and peer identities.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ProtocolError, ProtocolResult};

static COMMAND_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("Invalid command regex"));

/// A command name, guaranteed to match `[A-Za-z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandName(String);

impl CommandName {
    /// Validates and wraps a command name.
    pub fn new(name: impl Into<String>) -> ProtocolResult<Self> {
        let name = name.into();
        if COMMAND_REGEX.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(ProtocolError::invalid_command(name))
        }
    }

    /// Returns true if `name` is a valid command name.
    pub fn is_valid(name: &str) -> bool {
        COMMAND_REGEX.is_match(name)
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommandName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-assigned identity of a connected peer.
///
/// Identities start at zero, increase by one per accepted connection and
/// are never reused while the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Wraps a raw identity.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identity.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_word_characters() {
        for name in ["ping", "echo_2", "A", "_", "0"] {
            assert!(CommandName::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for name in ["", "with space", "dash-ed", "semi;", "naïve", "line\n"] {
            let err = CommandName::new(name).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidCommand { .. }), "{name:?}");
        }
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId::new(7).to_string(), "7");
        assert!(PeerId::new(1) < PeerId::new(2));
    }
}
