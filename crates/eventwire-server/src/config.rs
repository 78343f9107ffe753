//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};

use eventwire_protocol::MAX_LINE_LENGTH;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 7331;

/// Number of one-second samples kept by the default request meter.
pub const DEFAULT_RATE_HISTORY: usize = 40;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Prefix of the display name given to new peers ("User" → "User 3").
    pub name_prefix: String,

    /// Longest line accepted from a peer before its session is closed.
    pub max_line_length: usize,

    /// Seconds of request-rate history to keep.
    pub rate_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            name_prefix: "User".to_string(),
            max_line_length: MAX_LINE_LENGTH,
            rate_history: DEFAULT_RATE_HISTORY,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration listening on `bind_addr`.
    pub fn new(bind_addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Default::default()
        }
    }

    /// Builder: set the display name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Builder: set the maximum line length.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Builder: set the request-rate history length.
    pub fn with_rate_history(mut self, seconds: usize) -> Self {
        self.rate_history = seconds;
        self
    }

    /// Display name assigned to a newly accepted peer.
    pub fn default_peer_name(&self, id: eventwire_protocol::PeerId) -> String {
        format!("{} {}", self.name_prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventwire_protocol::PeerId;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.bind_addr.ip().is_loopback());
        assert_eq!(config.max_line_length, MAX_LINE_LENGTH);
        assert_eq!(config.rate_history, 40);
        assert_eq!(config.default_peer_name(PeerId::new(3)), "User 3");
    }

    #[test]
    fn custom_config() {
        let config = ServerConfig::new(([0, 0, 0, 0], 9000))
            .with_name_prefix("Player")
            .with_max_line_length(512)
            .with_rate_history(10);

        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.default_peer_name(PeerId::new(0)), "Player 0");
        assert_eq!(config.max_line_length, 512);
        assert_eq!(config.rate_history, 10);
    }
}
