//! Hodei orchestrator binary.
//!
//! Usage:
//!     hodei-orchestrator --bind tcp://127.0.0.1:7465 --state-store sqlite:/path/to/state.db

use anyhow::Context;
use clap::Parser;
use hodei_orchestrator::{Orchestrator, OrchestratorConfig};
use hodei_state::SqliteRepository;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hodei-orchestrator", about = "Hodei Pipelines control plane")]
struct Args {
    /// ZMQ bind address for workers
    #[arg(long, default_value = hodei_protocol::defaults::DEFAULT_ORCHESTRATOR_BIND_ADDR)]
    bind: String,

    /// Control API bind address (use "off" to disable)
    #[arg(long, default_value = hodei_protocol::defaults::DEFAULT_CONTROL_ADDR)]
    control: String,

    /// State store URL (sqlite:/path/to/state.db)
    #[arg(long)]
    state_store: Option<String>,

    /// Artifact cache root directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Mirror the full log filter on the console
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    hodei_logging::init_logging(hodei_logging::LogConfig {
        app_name: "hodei-orchestrator",
        verbose: args.verbose,
    })?;

    let home = hodei_logging::hodei_home();
    let state_store_url = args
        .state_store
        .unwrap_or_else(|| format!("sqlite:{}", home.join("state.db").display()));
    let cache_dir = args.cache_dir.unwrap_or_else(|| home.join("artifact-cache"));

    tracing::info!("Starting Hodei orchestrator");
    tracing::info!("  Bind: {}", args.bind);
    tracing::info!("  Control: {}", args.control);
    tracing::info!("  State store: {}", state_store_url);
    tracing::info!("  Artifact cache: {}", cache_dir.display());

    let config = OrchestratorConfig {
        bind_addr: args.bind,
        control_addr: (args.control != "off").then_some(args.control),
        state_store_url: state_store_url.clone(),
        cache_dir,
        ..Default::default()
    };

    let repo = SqliteRepository::connect(&state_store_url)
        .await
        .context("Failed to open state store")?;
    let orchestrator = Orchestrator::build(config, Arc::new(repo)).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(shutdown_rx).await
}
