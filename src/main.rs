use anyhow::Result;
use clap::Parser;
use mfrec::distributed::LocalCluster;
use mfrec::services::job;
use mfrec::{init_tracing_with_level, parse_args, Config};
use std::path::PathBuf;
use tracing::info;

/// Trains a factor model with a group of in-process workers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rating CSV with a header line and `userId,itemId,rating,timestamp` rows
    ratings: PathBuf,

    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of workers; defaults to `cluster.workers`
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write the coordinator's job summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Args = parse_args();
    init_tracing_with_level(&args.log_level);

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(workers) = args.workers {
        config.cluster.workers = workers;
    }
    config.validate()?;

    info!(
        "Starting mfrec with {} workers on {}",
        config.cluster.workers,
        args.ratings.display()
    );

    let results = LocalCluster::run(config.cluster.workers, |comm| {
        job::run(&config, &args.ratings, &comm)
    })?;

    // Rank order puts the coordinator's own failure ahead of its peers' aborts.
    let mut summaries = Vec::with_capacity(results.len());
    for result in results {
        summaries.push(result?);
    }

    if let (Some(path), Some(summary)) = (&args.summary, summaries.first()) {
        job::write_summary(summary, path)?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}
