//! DPoS daemon: entry point for running the consensus core.

mod standalone;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dpos_consensus::RoundCalculator;
use dpos_node::{
    init_logging, Blockchain, Collaborators, LogFormat, NodeConfig, ShutdownController,
    ThreadRandom,
};
use dpos_store::MemoryBlockStore;
use dpos_types::SystemClock;

use crate::standalone::StandaloneNetwork;

#[derive(Parser)]
#[command(name = "dpos-daemon", about = "DPoS consensus node daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "DPOS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "DPOS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "DPOS_LOG_FORMAT")]
    log_format: Option<String>,

    /// Start a new network from the configured genesis block.
    #[arg(long, env = "DPOS_NETWORK_START")]
    network_start: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the node until SIGINT/SIGTERM.
    Run,
    /// Print the round a height belongs to.
    Round { height: u64 },
    /// Print the effective configuration.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.network_start |= cli.network_start;

    match cli.command {
        Command::Round { height } => {
            let info = RoundCalculator::new(config.milestones.clone()).calculate_round(height)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Run => {
            let format: LogFormat = config.log_format.parse()?;
            init_logging(format, &config.log_level)?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run(config))?;
        }
    }
    Ok(())
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        network_start = config.network_start,
        milestones = config.milestones.milestones().len(),
        "starting DPoS node"
    );

    let shutdown = Arc::new(ShutdownController::new());
    let collaborators = Collaborators {
        store: Arc::new(MemoryBlockStore::new()),
        network: Arc::new(StandaloneNetwork),
        clock: Arc::new(SystemClock::new(config.epoch_unix_secs)),
        random: Arc::new(ThreadRandom),
    };
    let chain = Blockchain::new(config, collaborators, Arc::clone(&shutdown))?;

    let mut stopped = shutdown.subscribe();
    let worker = chain.spawn_worker(shutdown.subscribe());
    chain.start();

    tokio::select! {
        _ = shutdown.wait_for_signal() => {}
        _ = stopped.recv() => {}
    }

    chain.stop();
    shutdown.shutdown();
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "block worker did not stop cleanly");
    }

    if let Some(reason) = shutdown.failure() {
        anyhow::bail!("node terminated: {reason}");
    }
    tracing::info!(height = chain.last_height(), "DPoS daemon exited cleanly");
    Ok(())
}
