//! canopyd: the Canopy placement daemon.
//!
//! Loads an agent configuration and a scheduler tree inventory, then either
//! answers a single placement from the command line or serves a stream of
//! JSON requests on stdin.
//!
//! # Usage
//!
//! ```text
//! canopyd place --config agent.toml --inventory tree.toml --cpu 4 --memory-mb 2048
//! canopyd serve --config agent.toml --inventory tree.toml
//! ```
//!
//! Decisions go to stdout as JSON; logs go to stderr.

mod place;
mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use canopy_core::{AgentConfig, Inventory};

const DEFAULT_LOG_FILTER: &str = "info,canopyd=debug,canopy=debug";

#[derive(Parser)]
#[command(name = "canopyd", about = "Canopy placement daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one placement decision and print it as JSON.
    Place {
        /// Agent configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scheduler tree inventory.
        #[arg(long)]
        inventory: PathBuf,

        #[command(flatten)]
        request: place::RequestArgs,
    },
    /// Answer JSON placement requests from stdin, one per line.
    Serve {
        /// Agent configuration file, re-read on SIGHUP.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scheduler tree inventory.
        #[arg(long)]
        inventory: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (config_path, inventory_path) = match &cli.command {
        Command::Place {
            config, inventory, ..
        }
        | Command::Serve { config, inventory } => (config.clone(), inventory.clone()),
    };
    let config = load_config(config_path.as_deref())?;
    let inventory = Inventory::from_file(&inventory_path)?;
    info!(
        path = ?inventory_path,
        root = %inventory.root,
        hosts = inventory.hosts.len(),
        "inventory loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.agent.scheduler_service_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Command::Place { request, .. } => place::run(&config, &inventory, request).await,
            Command::Serve { .. } => serve::run(config_path, config, inventory).await,
        }
    })
}

/// Read the agent configuration, or fall back to defaults without a path.
fn load_config(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
    match path {
        Some(path) => {
            let config = AgentConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => {
            info!("no configuration file given, using defaults");
            Ok(AgentConfig::default())
        }
    }
}
