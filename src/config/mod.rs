use crate::error::{MfError, Result};
use crate::models::Formulation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Latent dimensionality `k`; every SGD update costs `O(k)`.
    pub num_factors: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    /// Fraction of rows (by stored order) used for training; the rest is held out.
    pub split_ratio: f32,
    /// Full passes over each worker's shard.
    pub iterations: usize,
    pub formulation: Formulation,
    /// Overrides the cluster-size heuristic when set.
    pub sync_interval: Option<usize>,
    /// Base seed; each worker adds its rank. `None` derives it from the clock.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub model_path: PathBuf,
    pub mapping_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub workers: usize,
    pub coordinator: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_factors: 50,
            learning_rate: 0.005,
            regularization: 0.02,
            split_ratio: 0.8,
            iterations: 20,
            formulation: Formulation::DotProduct,
            sync_interval: None,
            seed: None,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.bin"),
            mapping_path: PathBuf::from("movie_mapping.bin"),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            coordinator: "127.0.0.1:7070".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            data: DataConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MFREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::info!("Config file {} not found, using default configuration", path);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_training_config(&self.training)?;
        if self.cluster.workers == 0 {
            return Err(MfError::InvalidConfig(
                "cluster.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
