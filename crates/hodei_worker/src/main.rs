//! Hodei worker binary.
//!
//! Usage:
//!     hodei-worker --connect tcp://127.0.0.1:7465 --pool <pool-id> --cpu-cores 4 --memory-mb 8192

use anyhow::Context;
use clap::Parser;
use hodei_ids::{PoolId, WorkerId};
use hodei_protocol::ResourceSpec;
use hodei_worker::{Worker, WorkerConfig};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hodei-worker", about = "Hodei Pipelines worker agent")]
struct Args {
    /// Orchestrator address
    #[arg(long, default_value = hodei_protocol::defaults::DEFAULT_ORCHESTRATOR_BIND_ADDR)]
    connect: String,

    /// Pool to join
    #[arg(long)]
    pool: PoolId,

    /// Stable worker id (generated when omitted)
    #[arg(long)]
    worker_id: Option<WorkerId>,

    /// Human-readable worker name
    #[arg(long)]
    name: Option<String>,

    /// Capability tags as key=value (repeatable)
    #[arg(long = "capability", value_parser = parse_key_value)]
    capabilities: Vec<(String, String)>,

    /// Advertised CPU cores
    #[arg(long, default_value_t = 2)]
    cpu_cores: u64,

    /// Advertised memory in MB
    #[arg(long, default_value_t = 4096)]
    memory_mb: u64,

    /// Advertised disk in MB
    #[arg(long, default_value_t = 10_240)]
    disk_mb: u64,

    /// Local artifact cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Mirror the full log filter on the console
    #[arg(long, short)]
    verbose: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    hodei_logging::init_logging(hodei_logging::LogConfig {
        app_name: "hodei-worker",
        verbose: args.verbose,
    })?;

    let worker_id = args.worker_id.unwrap_or_default();
    let name = args
        .name
        .unwrap_or_else(|| format!("worker-{}", &worker_id.as_str()[..8]));
    let cache_dir = args
        .cache_dir
        .unwrap_or_else(|| hodei_logging::hodei_home().join("worker-cache"));

    tracing::info!("Starting Hodei worker [{}]", name);
    tracing::info!("  Orchestrator: {}", args.connect);
    tracing::info!("  Pool: {}", args.pool);
    tracing::info!("  Cache: {}", cache_dir.display());

    let config = WorkerConfig {
        orchestrator_addr: args.connect,
        worker_id,
        name,
        pool_id: args.pool,
        capabilities: args.capabilities.into_iter().collect::<HashMap<_, _>>(),
        resources: ResourceSpec::new(args.cpu_cores * 1000, args.memory_mb, args.disk_mb),
        cache_dir,
    };

    let mut worker = Worker::connect(config)
        .await
        .context("Failed to register with orchestrator")?;
    worker.run().await
}
