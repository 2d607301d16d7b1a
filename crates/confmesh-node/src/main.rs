#![warn(missing_docs)]

//! `cfm-node` binary.

use anyhow::Result;
use clap::Parser;
use confmesh_node::cli::{Cli, Command};
use confmesh_node::{LogFormat, Node, NodeConfig};
use confmesh_notify::PlainTemplating;
use confmesh_store::{MemoryStore, StaticLeader};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, node_id } => {
            let mut config = load_config(&config)?;
            if let Some(node_id) = node_id {
                config.node_id = node_id;
            }
            init_tracing(config.log_format);
            serve(config).await
        }
        Command::CheckConfig { config } => {
            let config = NodeConfig::from_file(&config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    if path.exists() {
        NodeConfig::from_file(path)
    } else {
        eprintln!("config file not found, using defaults: {}", path.display());
        Ok(NodeConfig::default())
    }
}

async fn serve(config: NodeConfig) -> Result<()> {
    tracing::info!(node = %config.node_id, "confmesh node starting");

    // Single-node mode: in-process store, always leader.
    let store = Arc::new(MemoryStore::new());
    let node = Node::start(
        config,
        store,
        Arc::new(StaticLeader(true)),
        Arc::new(PlainTemplating),
    )?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let report = node.shutdown().await?;
    tracing::info!(backends = report.deleted, "confmesh node stopped");
    Ok(())
}
