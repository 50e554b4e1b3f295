use crate::algorithms::optimizer::{Optimizer, SGD};
use crate::algorithms::FactorModel;
use crate::distributed::Communicator;
use crate::error::{MfError, Result};
use crate::models::{IdSpace, Rating, RatingSet};
use crate::utils::metrics::TrainingReport;
use crate::utils::{partition_range, sync_interval_for};
use std::time::Instant;
use tracing::{debug, info};

/// Local SGD on a contiguous shard with periodic parameter averaging.
///
/// Every rank builds one trainer over its own communicator and calls
/// [`PartitionedTrainer::train`] with the same arguments; the averaging
/// rounds are collective barriers.
pub struct PartitionedTrainer<'a> {
    comm: &'a dyn Communicator,
    sync_interval: usize,
    buffer: Vec<f32>,
}

impl<'a> PartitionedTrainer<'a> {
    /// `sync_interval` overrides the group-size heuristic when set.
    pub fn new(comm: &'a dyn Communicator, sync_interval: Option<usize>) -> Self {
        let sync_interval = sync_interval
            .unwrap_or_else(|| sync_interval_for(comm.world_size()))
            .max(1);
        Self {
            comm,
            sync_interval,
            buffer: Vec::new(),
        }
    }

    pub fn sync_interval(&self) -> usize {
        self.sync_interval
    }

    /// Whether iteration `iteration` (zero-based) of `iterations` ends with an averaging round.
    pub fn syncs_after(&self, iteration: usize, iterations: usize) -> bool {
        (iteration + 1) % self.sync_interval == 0 || iteration + 1 == iterations
    }

    pub fn train(
        &mut self,
        model: &mut FactorModel,
        train: &RatingSet,
        iterations: usize,
    ) -> Result<TrainingReport> {
        check_trainable(model, train)?;

        let rank = self.comm.rank();
        let world_size = self.comm.world_size();
        let shard = &train.ratings()[partition_range(train.count(), rank, world_size)];
        let optimizer = SGD::new(model.learning_rate, model.regularization);
        let mut report = TrainingReport::new(iterations, self.sync_interval);

        let span = tracing::info_span!("train", rank);
        let _guard = span.enter();

        if self.comm.is_coordinator() {
            info!(
                "Training {} ratings on {} workers, {} iterations, sync every {}",
                train.count(),
                world_size,
                iterations,
                self.sync_interval
            );
        }
        debug!("Local shard holds {} ratings", shard.len());

        self.buffer.reserve(model.parameter_count());

        for iteration in 0..iterations {
            let started = Instant::now();
            run_epoch(model, &optimizer, shard);
            report.record_compute(started.elapsed());

            if self.syncs_after(iteration, iterations) {
                let started = Instant::now();
                self.average(model)?;
                report.record_sync(started.elapsed());

                if self.comm.is_coordinator() {
                    info!("Iteration {}/{} synchronized", iteration + 1, iterations);
                }
            } else if self.comm.is_coordinator() && (iteration + 1) % 5 == 0 {
                debug!("Iteration {}/{} (local)", iteration + 1, iterations);
            }
        }

        if self.comm.is_coordinator() {
            report.log_summary();
        }
        Ok(report)
    }

    /// Replaces every rank's parameters with the element-wise mean over the group.
    pub fn average(&mut self, model: &mut FactorModel) -> Result<()> {
        model.write_parameters(&mut self.buffer);
        self.comm.all_reduce_sum(&mut self.buffer)?;
        let scale = 1.0 / self.comm.world_size() as f32;
        model.read_parameters(&self.buffer, scale)
    }
}

/// Trains on `comm`'s shard with the default sync policy.
pub fn train(
    model: &mut FactorModel,
    train: &RatingSet,
    iterations: usize,
    comm: &dyn Communicator,
) -> Result<TrainingReport> {
    PartitionedTrainer::new(comm, None).train(model, train, iterations)
}

/// Single-process SGD over the whole set, in stored order.
pub fn train_serial(model: &mut FactorModel, train: &RatingSet, iterations: usize) -> Result<()> {
    check_trainable(model, train)?;
    let optimizer = SGD::new(model.learning_rate, model.regularization);

    for iteration in 0..iterations {
        let started = Instant::now();
        run_epoch(model, &optimizer, train.ratings());
        info!(
            "Iteration {}/{} completed in {:.2}s",
            iteration + 1,
            iterations,
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

fn run_epoch<O: Optimizer>(model: &mut FactorModel, optimizer: &O, rows: &[Rating]) {
    for rating in rows {
        model.sgd_step(optimizer, rating);
    }
}

/// Rejects sets that are still sparse or index past the model's tables.
pub(crate) fn check_trainable(model: &FactorModel, train: &RatingSet) -> Result<()> {
    if train.id_space() != IdSpace::Dense {
        return Err(MfError::NotRemapped);
    }
    if train.num_users() > model.num_users || train.num_items() > model.num_items {
        return Err(MfError::InvalidConfig(format!(
            "model sized for {} users and {} items, ratings index {} users and {} items",
            model.num_users,
            model.num_items,
            train.num_users(),
            train.num_items()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalCluster;
    use crate::models::{Formulation, IdIndex};

    fn dense_set(rows: Vec<Rating>) -> RatingSet {
        let mut set = RatingSet::from_ratings(rows);
        let index = IdIndex::build(&set).unwrap();
        index.apply(&mut set).unwrap();
        set
    }

    fn synthetic(count: u32) -> RatingSet {
        dense_set(
            (0..count)
                .map(|i| Rating::new(i % 13, (i * 7) % 17, 1.0 + (i % 9) as f32 * 0.5, 0))
                .collect(),
        )
    }

    #[test]
    fn test_sparse_set_rejected() {
        let set = RatingSet::from_ratings(vec![Rating::new(3, 4, 5.0, 0)]);
        let mut model = FactorModel::new(4, 5, 2, 0.01, 0.02);
        assert!(matches!(train_serial(&mut model, &set, 1), Err(MfError::NotRemapped)));
    }

    #[test]
    fn test_undersized_model_rejected() {
        let set = synthetic(40);
        let mut model = FactorModel::new(2, 2, 2, 0.01, 0.02);
        assert!(matches!(
            train_serial(&mut model, &set, 1),
            Err(MfError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sync_schedule() {
        let comms = LocalCluster::new(2);
        let trainer = PartitionedTrainer::new(&comms[0], None);
        assert_eq!(trainer.sync_interval(), 3);
        let synced: Vec<usize> = (0..8).filter(|&i| trainer.syncs_after(i, 8)).collect();
        assert_eq!(synced, vec![2, 5, 7]);

        let trainer = PartitionedTrainer::new(&comms[0], Some(4));
        assert_eq!(trainer.sync_interval(), 4);
    }

    #[test]
    fn test_report_counts_syncs() {
        let set = synthetic(60);
        let reports = LocalCluster::run(2, |comm| {
            let mut model = FactorModel::new(set.num_users(), set.num_items(), 3, 0.01, 0.02);
            model.initialize(1 + comm.rank() as u64);
            train(&mut model, &set, 20, &comm).unwrap()
        })
        .unwrap();

        for report in reports {
            assert_eq!(report.sync_interval, 3);
            // Iterations 3, 6, .., 18 plus the final one.
            assert_eq!(report.sync_count, 7);
            assert!((report.comm_reduction_pct() - 65.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_average_is_element_wise_mean() {
        let averaged = LocalCluster::run(3, |comm| {
            let mut model = FactorModel::new(2, 2, 2, 0.01, 0.02).with_formulation(Formulation::Biased);
            model.user_features.fill(comm.rank() as f32);
            model.item_features.fill(10.0 * comm.rank() as f32);
            model.user_bias.fill(3.0 * comm.rank() as f32);
            PartitionedTrainer::new(&comm, None).average(&mut model).unwrap();
            model
        })
        .unwrap();

        for model in &averaged {
            assert!(model.user_features.iter().all(|&v| (v - 1.0).abs() < 1e-6));
            assert!(model.item_features.iter().all(|&v| (v - 10.0).abs() < 1e-5));
            assert!(model.user_bias.iter().all(|&v| (v - 3.0).abs() < 1e-6));
        }
        assert!(averaged.iter().all(|model| *model == averaged[0]));
    }

    #[test]
    fn test_single_worker_matches_serial() {
        let set = synthetic(100);
        let mut serial = FactorModel::new(set.num_users(), set.num_items(), 4, 0.01, 0.02);
        serial.initialize(7);
        let mut partitioned = serial.clone();

        train_serial(&mut serial, &set, 6).unwrap();
        let comms = LocalCluster::new(1);
        train(&mut partitioned, &set, 6, &comms[0]).unwrap();

        assert_eq!(serial, partitioned);
    }
}
