//! Command line for the `cfm-node` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parsed command line.
#[derive(Parser)]
#[command(name = "cfm-node")]
#[command(about = "Confmesh config service node", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the node until interrupted.
    Serve {
        /// Config file; defaults are used when it does not exist.
        #[arg(short, long, default_value = "/etc/confmesh/node.toml")]
        config: PathBuf,

        /// Overrides `node_id` from the config file.
        #[arg(long, env = "CFM_NODE_ID")]
        node_id: Option<String>,
    },
    /// Load and validate a config file, then print it.
    CheckConfig {
        /// Config file to check.
        #[arg(short, long)]
        config: PathBuf,
    },
}
