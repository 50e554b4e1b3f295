use anyhow::Result;
use clap::Parser;
use mfrec::services::job;
use mfrec::{init_tracing_with_level, parse_args, Config, Formulation};
use std::path::PathBuf;
use tracing::info;

/// Single-process trainer for the bias-aware model.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rating CSV with a header line and `userId,itemId,rating,timestamp` rows
    ratings: PathBuf,

    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write the job summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Args = parse_args();
    init_tracing_with_level(&args.log_level);

    info!("Starting mfrec serial trainer");

    let mut config = Config::load_or_default(&args.config)?;
    config.training.formulation = Formulation::Biased;
    config.validate()?;

    info!("Training configuration: {:?}", config.training);

    let summary = job::run_serial(&config, &args.ratings)?;

    if let Some(path) = &args.summary {
        job::write_summary(&summary, path)?;
    }

    Ok(())
}
