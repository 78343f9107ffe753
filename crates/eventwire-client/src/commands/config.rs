//! Configuration commands.

use crate::config::Settings;
use crate::error::ClientResult;

/// Dump the current configuration to stdout.
pub fn dump(settings: &Settings) -> ClientResult<()> {
    let toml_str = settings.to_toml()?;
    println!("# config.toml ({})", Settings::default_path().display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(settings: &Settings) -> ClientResult<()> {
    settings.server_config()?;
    let client = settings.client_config();
    println!("server: {}", settings.server.bind);
    println!("client: {}", client.address());
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    println!("config: {}", Settings::default_path().display());
    Ok(())
}
