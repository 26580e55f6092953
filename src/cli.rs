use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "critiq",
    version,
    about = "Criterion-by-criterion AI feedback engine for student submissions"
)]
pub struct Cli {
    /// Path to config.toml (default: ~/.critiq/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the feedback gateway
    Serve {
        /// Bind host (overrides the config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides the config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check reachability and auth of every configured provider endpoint
    Probe {
        /// Limit the check to one provider id
        #[arg(long)]
        provider: Option<String>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}
