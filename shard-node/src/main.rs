//! # eventshard
//!
//! Run an in-process eventshard node.
//!
//! ## Example
//!
//! ```bash
//! # Validate a config file
//! eventshard check-config --config node.toml
//!
//! # Boot the registry and first shard, then wait for ctrl-c
//! RUST_LOG=eventshard=debug eventshard serve --config node.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventshard_node::{Config, Node};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run an in-process eventshard node.
#[derive(Parser, Debug)]
#[command(name = "eventshard")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot the node and serve until interrupted
    Serve {
        /// Configuration file
        #[arg(long, short, default_value = "node.toml")]
        config: PathBuf,
    },

    /// Load a configuration file and print the effective settings
    CheckConfig {
        /// Configuration file
        #[arg(long, short, default_value = "node.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "eventshard=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = Config::from_file(&config)?;
            serve(&config).await?;
        }
        Commands::CheckConfig { config } => {
            let path = config;
            let config = Config::from_file(&path)?;
            config
                .event_records()
                .with_context(|| format!("Invalid event seed in {}", path.display()))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to render config")?
            );
        }
    }

    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let node = Node::start(config).await.context("Failed to start node")?;

    for shard in node.registry.get_canisters().await {
        tracing::info!(
            shard = %shard.principal,
            start = shard.entry_range.start,
            version = ?shard.wasm_version,
            "serving shard"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    let shards = node.registry.get_canisters().await.len();
    tracing::info!(shards, "shutting down");
    node.shutdown();
    Ok(())
}
