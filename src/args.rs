use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "launcher")]
#[command(version)]
#[command(about = "Keeps the GL&T background services running", long_about = None)]
pub(crate) struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the one in the config directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show the status of every service
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check whether one service is running (exit code 1 if not)
    Check {
        service: String,

        /// Fail when the process tools fail instead of reporting "stopped"
        #[arg(long)]
        strict: bool,
    },

    /// Start a service
    Start { service: String },

    /// Stop a service
    Stop { service: String },

    /// Start every service that is not running
    Verify,

    /// Launch a tool (e.g. dabit, wiznet)
    Open { tool: String },

    /// Verify, then keep polling and accept start/stop commands on stdin
    Watch,

    /// Show the effective configuration
    Config {
        /// Write a config file with the built-in services
        #[arg(long)]
        init: bool,
    },
}
