use crate::algorithms::checkpoint::{save_item_mapping_logged, save_model_logged};
use crate::algorithms::initializer::worker_seed;
use crate::algorithms::FactorModel;
use crate::config::Config;
use crate::distributed::Communicator;
use crate::error::MfError;
use crate::models::{Formulation, IdIndex, RatingSet};
use crate::services::{evaluation, store, training};
use crate::utils::clock_seed;
use crate::utils::metrics::TrainingReport;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Outcome of one training job, as seen by one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub rank: usize,
    pub world_size: usize,
    pub formulation: Formulation,
    pub num_ratings: usize,
    pub num_users: usize,
    pub num_items: usize,
    pub train_count: usize,
    pub test_count: usize,
    pub global_mean: f32,
    pub seed: u64,
    pub rmse: f64,
    pub elapsed_secs: f64,
    pub report: Option<TrainingReport>,
    /// Only the coordinator writes output files.
    pub model_saved: bool,
    pub mapping_saved: bool,
}

/// Ratings remapped and split, plus a model sized and initialized for them.
struct Prepared {
    index: IdIndex,
    num_ratings: usize,
    train: RatingSet,
    test: RatingSet,
    model: FactorModel,
    seed: u64,
}

fn prepare(config: &Config, mut ratings: RatingSet, rank: usize) -> Result<Prepared> {
    if ratings.is_empty() {
        return Err(MfError::EmptyDataset("rating").into());
    }
    let num_ratings = ratings.count();

    let index = IdIndex::build(&ratings)?;
    index.apply(&mut ratings)?;

    let training_config = &config.training;
    let (train, test) = ratings.split(training_config.split_ratio);

    let mut model = FactorModel::new(
        index.num_users(),
        index.num_items(),
        training_config.num_factors,
        training_config.learning_rate,
        training_config.regularization,
    )
    .with_formulation(training_config.formulation);
    model
        .compute_global_mean(&train)
        .context("Cannot fit the global mean")?;

    let seed = worker_seed(training_config.seed.unwrap_or_else(clock_seed), rank);
    model.initialize(seed);

    Ok(Prepared {
        index,
        num_ratings,
        train,
        test,
        model,
        seed,
    })
}

/// Runs load, remap, split, train, evaluate and save on one rank of a group.
///
/// Every rank of `comm` must call this with the same configuration and path.
pub fn run(config: &Config, ratings_path: &Path, comm: &dyn Communicator) -> Result<JobSummary> {
    let started = Instant::now();
    let rank = comm.rank();

    let ratings = store::load(ratings_path, comm)
        .with_context(|| format!("Failed to load ratings from {}", ratings_path.display()))?;
    let Prepared {
        index,
        num_ratings,
        train,
        test,
        mut model,
        seed,
    } = prepare(config, ratings, rank)?;

    if comm.is_coordinator() {
        info!(
            "{} users, {} items, {} training and {} test ratings",
            index.num_users(),
            index.num_items(),
            train.count(),
            test.count()
        );
    }

    let report = training::PartitionedTrainer::new(comm, config.training.sync_interval)
        .train(&mut model, &train, config.training.iterations)
        .context("Training failed")?;

    let rmse = evaluation::rmse(&model, &test, comm).context("Evaluation failed")?;

    let (model_saved, mapping_saved) = if comm.is_coordinator() {
        info!("Test RMSE: {:.4}", rmse);
        save_outputs(config, &model, &index)
    } else {
        (false, false)
    };

    Ok(JobSummary {
        rank,
        world_size: comm.world_size(),
        formulation: model.formulation,
        num_ratings,
        num_users: index.num_users(),
        num_items: index.num_items(),
        train_count: train.count(),
        test_count: test.count(),
        global_mean: model.global_mean,
        seed,
        rmse,
        elapsed_secs: started.elapsed().as_secs_f64(),
        report: Some(report),
        model_saved,
        mapping_saved,
    })
}

/// Single-process variant of [`run`]: no collectives, whole set on this thread.
pub fn run_serial(config: &Config, ratings_path: &Path) -> Result<JobSummary> {
    let started = Instant::now();

    let ratings = store::parse_file(ratings_path)
        .with_context(|| format!("Failed to load ratings from {}", ratings_path.display()))?;
    info!("Loaded {} ratings", ratings.count());

    let Prepared {
        index,
        num_ratings,
        train,
        test,
        mut model,
        seed,
    } = prepare(config, ratings, 0)?;
    info!(
        "{} users, {} items, global mean {:.3}",
        index.num_users(),
        index.num_items(),
        model.global_mean
    );

    training::train_serial(&mut model, &train, config.training.iterations).context("Training failed")?;
    let rmse = evaluation::rmse_local(&model, &test).context("Evaluation failed")?;
    info!("Test RMSE: {:.4}", rmse);

    let (model_saved, mapping_saved) = save_outputs(config, &model, &index);

    Ok(JobSummary {
        rank: 0,
        world_size: 1,
        formulation: model.formulation,
        num_ratings,
        num_users: index.num_users(),
        num_items: index.num_items(),
        train_count: train.count(),
        test_count: test.count(),
        global_mean: model.global_mean,
        seed,
        rmse,
        elapsed_secs: started.elapsed().as_secs_f64(),
        report: None,
        model_saved,
        mapping_saved,
    })
}

fn save_outputs(config: &Config, model: &FactorModel, index: &IdIndex) -> (bool, bool) {
    let model_saved = save_model_logged(model, &config.data.model_path);
    let mapping_saved = save_item_mapping_logged(index.reverse_item_ids(), &config.data.mapping_path);
    (model_saved, mapping_saved)
}

/// Writes `summary` as pretty JSON.
pub fn write_summary(summary: &JobSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalCluster;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.training.num_factors = 4;
        config.training.iterations = 5;
        config.training.seed = Some(42);
        config.data.model_path = dir.path().join("model.bin");
        config.data.mapping_path = dir.path().join("movie_mapping.bin");
        config
    }

    fn write_ratings(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let mut csv = String::from("userId,movieId,rating,timestamp\n");
        for i in 0..50u32 {
            csv.push_str(&format!("{},{},{},{}\n", 1 + i % 6, 10 * (1 + i % 8), 1.0 + (i % 5) as f32, i));
        }
        let path = dir.path().join("ratings.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    #[test]
    fn test_group_job_agrees_across_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let path = write_ratings(&dir);

        let summaries = LocalCluster::run(2, |comm| run(&config, &path, &comm).unwrap()).unwrap();
        assert_eq!(summaries[0].rmse, summaries[1].rmse);
        assert_eq!(summaries[0].num_users, 6);
        assert_eq!(summaries[0].num_items, 8);
        assert_eq!(summaries[0].train_count, 40);
        assert_eq!(summaries[1].seed, 43);
        assert!(summaries[0].model_saved && summaries[0].mapping_saved);
        assert!(!summaries[1].model_saved);
        assert!(config.data.model_path.exists());
    }

    #[test]
    fn test_serial_job_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.training.formulation = Formulation::Biased;
        let path = write_ratings(&dir);

        let summary = run_serial(&config, &path).unwrap();
        assert_eq!(summary.formulation, Formulation::Biased);
        assert!(summary.report.is_none());

        let summary_path = dir.path().join("summary.json");
        write_summary(&summary, &summary_path).unwrap();
        let parsed: JobSummary = serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(parsed.test_count, summary.test_count);
        assert_eq!(parsed.formulation, Formulation::Biased);
    }

    #[test]
    fn test_empty_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let path = dir.path().join("ratings.csv");
        std::fs::write(&path, "userId,movieId,rating,timestamp\n").unwrap();

        let error = run_serial(&config, &path).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<MfError>(),
            Some(MfError::EmptyDataset("rating"))
        ));
    }
}
