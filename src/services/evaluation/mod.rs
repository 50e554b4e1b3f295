use crate::algorithms::FactorModel;
use crate::distributed::{broadcast_value, Communicator};
use crate::error::{MfError, Result};
use crate::models::RatingSet;
use crate::services::training::check_trainable;
use crate::utils::metrics::{rmse_from_sum, SquaredError};
use crate::utils::partition_range;

/// Root mean squared error over `test`, computed collectively.
///
/// Each rank scores its contiguous shard, the coordinator turns the summed
/// squared error into the RMSE, and every rank returns that same value.
pub fn rmse(model: &FactorModel, test: &RatingSet, comm: &dyn Communicator) -> Result<f64> {
    if test.is_empty() {
        return Err(MfError::EmptyDataset("test"));
    }
    check_trainable(model, test)?;

    let range = partition_range(test.count(), comm.rank(), comm.world_size());
    let local = squared_error(model, &test.ratings()[range]);

    let total = comm.reduce_sum(local.sum)?;
    let value = total.and_then(|sum| rmse_from_sum(sum, test.count()));
    Ok(broadcast_value(comm, value.as_ref())?)
}

/// RMSE of the whole set on the calling thread.
pub fn rmse_local(model: &FactorModel, test: &RatingSet) -> Result<f64> {
    check_trainable(model, test)?;
    squared_error(model, test.ratings())
        .rmse()
        .ok_or(MfError::EmptyDataset("test"))
}

fn squared_error(model: &FactorModel, rows: &[crate::models::Rating]) -> SquaredError {
    let mut acc = SquaredError::default();
    for rating in rows {
        acc.add(
            rating.rating,
            model.score(rating.user_id as usize, rating.item_id as usize),
        );
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalCluster;
    use crate::models::{IdIndex, Rating};

    fn dense(rows: Vec<Rating>) -> RatingSet {
        let mut set = RatingSet::from_ratings(rows);
        IdIndex::build(&set).unwrap().apply(&mut set).unwrap();
        set
    }

    #[test]
    fn test_every_rank_sees_the_same_rmse() {
        let test = dense((0..11).map(|i| Rating::new(i % 4, i % 5, 0.5 + (i % 10) as f32 * 0.5, 0)).collect());
        let mut model = FactorModel::new(4, 5, 3, 0.01, 0.02);
        model.initialize(3);
        let expected = rmse_local(&model, &test).unwrap();

        for world_size in 1..=4 {
            let values = LocalCluster::run(world_size, |comm| rmse(&model, &test, &comm).unwrap()).unwrap();
            for value in values {
                assert!((value - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_rmse_is_bounded() {
        let test = dense(vec![Rating::new(1, 1, 5.0, 0), Rating::new(2, 2, 0.5, 0)]);
        let mut model = FactorModel::new(2, 2, 1, 0.01, 0.02);
        model.user_features.fill(10.0);
        model.item_features.fill(10.0);

        let value = rmse_local(&model, &test).unwrap();
        assert!(value >= 0.0);
        assert!(value <= 4.5);
        assert!((value - (4.5f64 * 4.5 / 2.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_or_oversized_sets_rejected() {
        let model = FactorModel::new(1, 1, 2, 0.01, 0.02);
        let sparse = RatingSet::from_ratings(vec![Rating::new(40, 900, 4.0, 0)]);
        let results = LocalCluster::run(3, |comm| rmse(&model, &sparse, &comm)).unwrap();
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(MfError::NotRemapped))));
        assert!(matches!(rmse_local(&model, &sparse), Err(MfError::NotRemapped)));

        let wide = dense(vec![Rating::new(1, 1, 4.0, 0), Rating::new(2, 3, 2.0, 0)]);
        let results = LocalCluster::run(2, |comm| rmse(&model, &wide, &comm)).unwrap();
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(MfError::InvalidConfig(_)))));
        assert!(matches!(rmse_local(&model, &wide), Err(MfError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_test_set_fails_everywhere() {
        let test = dense(Vec::new());
        let model = FactorModel::new(0, 0, 1, 0.01, 0.02);
        let results = LocalCluster::run(2, |comm| rmse(&model, &test, &comm)).unwrap();
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(MfError::EmptyDataset("test")))));
    }
}
