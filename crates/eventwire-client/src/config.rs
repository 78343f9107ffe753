//! Client configuration.
//!
//! Runtime options for a connection live in [`ClientConfig`]. The optional
//! `config.toml` read by the CLI is [`Settings`]; it covers both the demo
//! server and the interactive client and lives at
//! `~/.config/eventwire/config.toml` by default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eventwire_protocol::MAX_LINE_LENGTH;
use eventwire_server::{DEFAULT_PORT, DEFAULT_RATE_HISTORY, ServerConfig};

use crate::error::{ClientError, ClientResult};

/// Connection options for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address of the server.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Give up a connect attempt after this long. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,

    /// Longest line accepted from the server.
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: None,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Builder: set the maximum line length.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// `host:port`, for logs and errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Settings (config.toml)
// ---------------------------------------------------------------------------

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Debug logging.
    pub debug: bool,

    /// Demo server settings.
    pub server: ServerSettings,

    /// Interactive client settings.
    pub client: ClientSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: String,

    /// Prefix of default peer names.
    pub name_prefix: String,

    /// Longest accepted line, in bytes.
    pub max_line_length: usize,

    /// Seconds of request-rate history.
    pub rate_history: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{DEFAULT_PORT}"),
            name_prefix: "User".to_string(),
            max_line_length: MAX_LINE_LENGTH,
            rate_history: DEFAULT_RATE_HISTORY,
        }
    }
}

/// `[client]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Connect timeout in seconds; 0 disables it.
    pub connect_timeout: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: 5,
        }
    }
}

impl Settings {
    /// Loads settings from the default path, or defaults if the file is absent.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads settings from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eventwire")
            .join("config.toml")
    }

    /// Serializes the settings back to TOML.
    pub fn to_toml(&self) -> ClientResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ClientError::config(format!("failed to serialize config: {}", e)))
    }

    /// Server configuration from the `[server]` section.
    pub fn server_config(&self) -> ClientResult<ServerConfig> {
        let bind: SocketAddr = self.server.bind.parse().map_err(|e| {
            ClientError::config(format!("invalid server.bind {:?}: {}", self.server.bind, e))
        })?;
        if self.server.max_line_length == 0 {
            return Err(ClientError::config("server.max_line_length must be positive"));
        }
        Ok(ServerConfig::new(bind)
            .with_name_prefix(&self.server.name_prefix)
            .with_max_line_length(self.server.max_line_length)
            .with_rate_history(self.server.rate_history))
    }

    /// Client configuration from the `[client]` section.
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(&self.client.host, self.client.port);
        match self.client.connect_timeout {
            0 => config,
            secs => config.with_connect_timeout(Duration::from_secs(secs)),
        }
    }
}
