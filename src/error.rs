use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the collective layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("worker group aborted by rank {rank} with code {code}")]
    Aborted { rank: usize, code: i32 },
    #[error("lost connection to rank {rank}")]
    Disconnected { rank: usize },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("collective buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum MfError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("malformed rating row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error("model file truncated in {section}: expected {expected} bytes, read {actual}")]
    TruncatedModel {
        section: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("corrupt model file: {0}")]
    CorruptModel(String),
    #[error("rating set has already been remapped to dense indices")]
    AlreadyRemapped,
    #[error("rating set still uses sparse ids; apply an IdIndex first")]
    NotRemapped,
    #[error("{0} set is empty")]
    EmptyDataset(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl MfError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MfError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MfError>;
