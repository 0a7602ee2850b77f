//! CLI surface for the `voxline` binary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use vx_domain::config::Config;
use vx_domain::error::Result;

#[derive(Debug, Parser)]
#[command(name = "voxline", about = "Real-time voice-conversation gateway")]
pub struct Cli {
    /// Path to the TOML configuration file. Missing file = defaults.
    #[arg(short, long, global = true, default_value = "voxline.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and report issues.
    Validate,
    /// Print the effective configuration (defaults applied).
    Show,
}

pub fn load_config(path: &Path) -> Result<Config> {
    Config::load(path)
}
