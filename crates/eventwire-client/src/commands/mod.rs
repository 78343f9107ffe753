//! Subcommand implementations.

pub mod config;
pub mod connect;
pub mod serve;
