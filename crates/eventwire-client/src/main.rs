//! eventwire CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use eventwire_core::{TracingConfig, init_tracing};

use eventwire_client::cli::{Cli, Command, ConfigAction};
use eventwire_client::commands;
use eventwire_client::config::Settings;
use eventwire_client::error::{ClientError, ClientResult};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ClientResult<()> {
    let settings = match cli.config {
        Some(ref path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let tracing = if cli.debug || settings.debug {
        TracingConfig::debug()
    } else if matches!(cli.command, Command::Serve { .. }) {
        TracingConfig::server()
    } else {
        TracingConfig::default().with_level(tracing::Level::WARN)
    };
    init_tracing(tracing).map_err(|e| ClientError::config(e.to_string()))?;

    match cli.command {
        Command::Serve { bind } => {
            let mut settings = settings;
            if let Some(bind) = bind {
                settings.server.bind = bind;
            }
            commands::serve::run(settings.server_config()?)
        }
        Command::Connect { host, port } => {
            let mut settings = settings;
            if let Some(host) = host {
                settings.client.host = host;
            }
            if let Some(port) = port {
                settings.client.port = port;
            }
            commands::connect::run(settings.client_config())
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&settings),
            ConfigAction::Validate => commands::config::validate(&settings),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
