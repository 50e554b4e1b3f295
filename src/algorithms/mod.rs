pub mod checkpoint;
pub mod initializer;
pub mod optimizer;

use crate::error::{MfError, Result};
use crate::models::{Formulation, Rating, RatingSet};
use ndarray::{Array1, Array2};
use optimizer::Optimizer;

pub const MIN_RATING: f32 = 0.5;
pub const MAX_RATING: f32 = 5.0;

/// Learning rate assumed for models read back from disk.
pub const DEFAULT_LEARNING_RATE: f32 = 0.005;
/// Regularization assumed for models read back from disk.
pub const DEFAULT_REGULARIZATION: f32 = 0.02;

/// Biased matrix factorization over dense user and item indices.
///
/// `user_features` is `num_users x num_factors` and `item_features` is
/// `num_items x num_factors`, both row-major. Bias vectors are indexed like
/// the feature rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    pub num_users: usize,
    pub num_items: usize,
    pub num_factors: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    pub global_mean: f32,
    pub user_features: Array2<f32>,
    pub item_features: Array2<f32>,
    pub user_bias: Array1<f32>,
    pub item_bias: Array1<f32>,
    pub formulation: Formulation,
}

impl FactorModel {
    /// Allocates zeroed tables. Call [`FactorModel::initialize`] before training.
    pub fn new(
        num_users: usize,
        num_items: usize,
        num_factors: usize,
        learning_rate: f32,
        regularization: f32,
    ) -> Self {
        Self {
            num_users,
            num_items,
            num_factors,
            learning_rate,
            regularization,
            global_mean: 0.0,
            user_features: Array2::zeros((num_users, num_factors)),
            item_features: Array2::zeros((num_items, num_factors)),
            user_bias: Array1::zeros(num_users),
            item_bias: Array1::zeros(num_items),
            formulation: Formulation::DotProduct,
        }
    }

    pub fn with_formulation(mut self, formulation: Formulation) -> Self {
        self.formulation = formulation;
        self
    }

    /// Fills user features, then item features, with `uniform[0,1) * 0.1`
    /// drawn from a generator seeded with `seed`. Biases are left untouched.
    pub fn initialize(&mut self, seed: u64) {
        let mut rng = initializer::seeded_rng(seed);
        initializer::fill_scaled_uniform(self.user_features.iter_mut(), &mut rng, initializer::INIT_SCALE);
        initializer::fill_scaled_uniform(self.item_features.iter_mut(), &mut rng, initializer::INIT_SCALE);
    }

    /// Fixes `global_mean` to the mean training rating.
    pub fn compute_global_mean(&mut self, train: &RatingSet) -> Result<()> {
        self.global_mean = train
            .mean_rating()
            .ok_or(MfError::EmptyDataset("training"))?;
        Ok(())
    }

    fn dot(&self, user: usize, item: usize) -> f32 {
        self.user_features.row(user).dot(&self.item_features.row(item))
    }

    /// `global_mean + user_bias + item_bias + dot`, clamped to the rating scale.
    pub fn predict(&self, user: usize, item: usize) -> f32 {
        let raw = self.global_mean + self.user_bias[user] + self.item_bias[item] + self.dot(user, item);
        clamp_rating(raw)
    }

    /// Dot product only, clamped to the rating scale. Differs from
    /// [`FactorModel::predict`] by the unclamped `global_mean + user_bias + item_bias`.
    pub fn predict_dot(&self, user: usize, item: usize) -> f32 {
        clamp_rating(self.dot(user, item))
    }

    /// Prediction under the model's own formulation.
    pub fn score(&self, user: usize, item: usize) -> f32 {
        match self.formulation {
            Formulation::Biased => self.predict(user, item),
            Formulation::DotProduct => self.predict_dot(user, item),
        }
    }

    /// One SGD step on a dense rating. Returns the pre-update error.
    pub fn sgd_step<O: Optimizer + ?Sized>(&mut self, optimizer: &O, rating: &Rating) -> f32 {
        let user = rating.user_id as usize;
        let item = rating.item_id as usize;
        let error = rating.rating - self.score(user, item);

        if self.formulation == Formulation::Biased {
            optimizer.update_bias(error, &mut self.user_bias[user]);
            optimizer.update_bias(error, &mut self.item_bias[item]);
        }
        optimizer.update_factors(
            error,
            self.user_features.row_mut(user),
            self.item_features.row_mut(item),
        );
        error
    }

    /// Highest-scoring items for `user`, skipping `exclude`. Empty for an unknown user.
    pub fn top_items(&self, user: usize, n: usize, exclude: &[u32]) -> Vec<(u32, f32)> {
        if user >= self.num_users {
            return Vec::new();
        }
        let scores: Vec<f32> = (0..self.num_items)
            .map(|item| {
                if exclude.contains(&(item as u32)) {
                    f32::NEG_INFINITY
                } else {
                    self.score(user, item)
                }
            })
            .collect();

        crate::utils::top_k_indices(&scores, n)
            .into_iter()
            .filter(|&item| scores[item].is_finite())
            .map(|item| (item as u32, scores[item]))
            .collect()
    }

    /// Number of scalars exchanged when averaging this model.
    pub fn parameter_count(&self) -> usize {
        let features = (self.num_users + self.num_items) * self.num_factors;
        match self.formulation {
            Formulation::Biased => features + self.num_users + self.num_items,
            Formulation::DotProduct => features,
        }
    }

    /// Flattens the averaged parameters into `buffer`, reusing its allocation.
    /// Layout: user features, item features, then biases for the biased model.
    pub fn write_parameters(&self, buffer: &mut Vec<f32>) {
        buffer.clear();
        buffer.extend(self.user_features.iter());
        buffer.extend(self.item_features.iter());
        if self.formulation == Formulation::Biased {
            buffer.extend(self.user_bias.iter());
            buffer.extend(self.item_bias.iter());
        }
    }

    /// Overwrites parameters with `buffer * scale`, in the layout of
    /// [`FactorModel::write_parameters`].
    pub fn read_parameters(&mut self, buffer: &[f32], scale: f32) -> Result<()> {
        if buffer.len() != self.parameter_count() {
            return Err(MfError::Cluster(crate::error::ClusterError::LengthMismatch {
                expected: self.parameter_count(),
                actual: buffer.len(),
            }));
        }

        let biased = self.formulation == Formulation::Biased;
        let mut values = buffer.iter().map(|value| value * scale);
        let tables = self
            .user_features
            .iter_mut()
            .chain(self.item_features.iter_mut());
        for slot in tables {
            if let Some(value) = values.next() {
                *slot = value;
            }
        }
        if biased {
            for slot in self.user_bias.iter_mut().chain(self.item_bias.iter_mut()) {
                if let Some(value) = values.next() {
                    *slot = value;
                }
            }
        }
        Ok(())
    }
}

pub fn clamp_rating(value: f32) -> f32 {
    value.clamp(MIN_RATING, MAX_RATING)
}
