pub mod algorithms;
pub mod config;
pub mod distributed;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use algorithms::FactorModel;
pub use config::Config;
pub use error::{ClusterError, MfError, Result};
pub use models::*;

/// Installs the fmt subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

/// Installs the subscriber at `level` unless `RUST_LOG` is already set.
pub fn init_tracing_with_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", level);
    }
    init_tracing();
}

/// Parses command-line arguments. Usage errors print clap's message and exit
/// with status 1; `--help` and `--version` exit with status 0.
pub fn parse_args<P: clap::Parser>() -> P {
    P::try_parse().unwrap_or_else(|e| {
        if e.use_stderr() {
            eprint!("{}", e);
            std::process::exit(1);
        }
        e.exit()
    })
}
