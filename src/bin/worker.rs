use anyhow::{Context, Result};
use clap::Parser;
use mfrec::distributed::{Communicator, TcpCommunicator};
use mfrec::services::job;
use mfrec::services::store::LOAD_ABORT_CODE;
use mfrec::{init_tracing_with_level, parse_args, Config};
use std::path::PathBuf;
use tracing::{error, info};

/// One rank of a multi-process training group. Start one process per rank;
/// rank 0 listens on the coordinator address.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rating CSV; only read by rank 0
    ratings: PathBuf,

    #[arg(long)]
    rank: usize,

    #[arg(long)]
    world_size: usize,

    /// `host:port` of rank 0; defaults to `cluster.coordinator`
    #[arg(long)]
    coordinator: Option<String>,

    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write this rank's job summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Args = parse_args();
    init_tracing_with_level(&args.log_level);

    let config = Config::load_or_default(&args.config)?;
    config.validate()?;
    let coordinator = args
        .coordinator
        .clone()
        .unwrap_or_else(|| config.cluster.coordinator.clone());

    info!(
        "Starting mfrec worker {}/{} (coordinator {})",
        args.rank, args.world_size, coordinator
    );

    let comm = TcpCommunicator::connect(args.rank, args.world_size, coordinator.as_str())
        .with_context(|| format!("Failed to join the worker group at {}", coordinator))?;

    let summary = match job::run(&config, &args.ratings, &comm) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Rank {} failed: {:#}", args.rank, e);
            comm.abort(LOAD_ABORT_CODE);
            return Err(e);
        }
    };

    if let Some(path) = &args.summary {
        job::write_summary(&summary, path)?;
    }

    Ok(())
}
