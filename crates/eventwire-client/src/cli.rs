//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// eventwire - line-framed remote events over TCP
#[derive(Debug, Parser)]
#[command(name = "eventwire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "EVENTWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat relay server in the foreground
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long, short)]
        bind: Option<String>,
    },

    /// Connect to a server and relay stdin
    ///
    /// Plain lines are sent as `say` events. `/emit NAME [JSON ARRAY]`
    /// sends any event, `/raw TEXT` sends a line verbatim and `/quit`
    /// disconnects.
    Connect {
        /// Server host (overrides client.host)
        #[arg(long)]
        host: Option<String>,

        /// Server port (overrides client.port)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_connect_overrides() {
        let cli = Cli::try_parse_from(["eventwire", "-v", "connect", "--host", "h", "-p", "9"])
            .unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::Connect { host, port } => {
                assert_eq!(host.as_deref(), Some("h"));
                assert_eq!(port, Some(9));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn requires_a_command() {
        assert!(Cli::try_parse_from(["eventwire"]).is_err());
    }
}
