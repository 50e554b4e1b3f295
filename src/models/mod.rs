pub mod id_index;

pub use id_index::IdIndex;

use serde::{Deserialize, Serialize};

/// One observed rating. Ids are sparse catalog ids after loading and dense
/// indices once an [`IdIndex`] has been applied to the owning [`RatingSet`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: u32,
    pub item_id: u32,
    pub rating: f32,
    pub timestamp: i64,
}

impl Rating {
    pub fn new(user_id: u32, item_id: u32, rating: f32, timestamp: i64) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSpace {
    Sparse,
    Dense,
}

/// Which prediction function the model trains and scores with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Formulation {
    /// `dot(p_u, q_i)` only.
    #[default]
    DotProduct,
    /// `mu + b_u + b_i + dot(p_u, q_i)`.
    Biased,
}

/// Ordered ratings plus the bookkeeping needed to size the id tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingSet {
    ratings: Vec<Rating>,
    max_user_id: u32,
    max_item_id: u32,
    num_users: usize,
    num_items: usize,
    id_space: IdSpace,
}

impl RatingSet {
    /// Wraps rows in the sparse id space, computing the id maxima.
    pub fn from_ratings(ratings: Vec<Rating>) -> Self {
        let max_user_id = ratings.iter().map(|r| r.user_id).max().unwrap_or(0);
        let max_item_id = ratings.iter().map(|r| r.item_id).max().unwrap_or(0);
        Self::from_parts(ratings, max_user_id, max_item_id)
    }

    /// Wraps rows whose maxima were already tracked while parsing.
    pub fn from_parts(ratings: Vec<Rating>, max_user_id: u32, max_item_id: u32) -> Self {
        Self {
            ratings,
            max_user_id,
            max_item_id,
            num_users: 0,
            num_items: 0,
            id_space: IdSpace::Sparse,
        }
    }

    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    pub fn count(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn max_user_id(&self) -> u32 {
        self.max_user_id
    }

    pub fn max_item_id(&self) -> u32 {
        self.max_item_id
    }

    /// Observed user cardinality; zero until the set is remapped.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }

    pub(crate) fn ratings_mut(&mut self) -> &mut [Rating] {
        &mut self.ratings
    }

    pub(crate) fn mark_dense(&mut self, num_users: usize, num_items: usize) {
        self.num_users = num_users;
        self.num_items = num_items;
        self.id_space = IdSpace::Dense;
    }

    /// Splits by position: the first `floor(count * ratio)` rows train, the
    /// rest test. No shuffling. Both halves own fresh storage.
    pub fn split(self, ratio: f32) -> (RatingSet, RatingSet) {
        let RatingSet {
            ratings,
            max_user_id,
            max_item_id,
            num_users,
            num_items,
            id_space,
        } = self;

        // Multiply in f32: 10 rows at 0.7 must give 7.
        let train_size = ((ratings.len() as f32 * ratio) as usize).min(ratings.len());
        let (train_rows, test_rows) = ratings.split_at(train_size);

        let half = |rows: &[Rating]| RatingSet {
            ratings: rows.to_vec(),
            max_user_id,
            max_item_id,
            num_users,
            num_items,
            id_space,
        };
        (half(train_rows), half(test_rows))
    }

    /// Mean of all ratings, accumulated in f64.
    pub fn mean_rating(&self) -> Option<f32> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: f64 = self.ratings.iter().map(|r| r.rating as f64).sum();
        Some((sum / self.ratings.len() as f64) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> RatingSet {
        RatingSet::from_ratings(vec![
            Rating::new(1, 1, 5.0, 0),
            Rating::new(1, 2, 1.0, 0),
            Rating::new(2, 1, 4.0, 0),
            Rating::new(2, 2, 2.0, 0),
        ])
    }

    #[test]
    fn test_maxima_tracked() {
        let set = scenario();
        assert_eq!(set.count(), 4);
        assert_eq!(set.max_user_id(), 2);
        assert_eq!(set.max_item_id(), 2);
        assert_eq!(set.id_space(), IdSpace::Sparse);
    }

    #[test]
    fn test_split_keeps_order() {
        let (train, test) = scenario().split(0.5);
        assert_eq!(train.ratings(), &[Rating::new(1, 1, 5.0, 0), Rating::new(1, 2, 1.0, 0)]);
        assert_eq!(test.ratings(), &[Rating::new(2, 1, 4.0, 0), Rating::new(2, 2, 2.0, 0)]);
    }

    #[test]
    fn test_split_rounds_down() {
        let set = RatingSet::from_ratings((0..7).map(|i| Rating::new(i, i, 3.0, 0)).collect());
        let (train, test) = set.split(0.8);
        assert_eq!(train.count(), 5);
        assert_eq!(test.count(), 2);
    }

    #[test]
    fn test_split_ratio_in_single_precision() {
        let set = RatingSet::from_ratings((0..10).map(|i| Rating::new(i, i, 3.0, 0)).collect());
        let (train, test) = set.split(0.7);
        assert_eq!(train.count(), 7);
        assert_eq!(test.count(), 3);

        let set = RatingSet::from_ratings((0..100).map(|i| Rating::new(i, i, 3.0, 0)).collect());
        let (train, test) = set.split(0.9);
        assert_eq!(train.count(), 90);
        assert_eq!(test.count(), 10);
    }

    #[test]
    fn test_mean_rating() {
        assert_eq!(scenario().mean_rating(), Some(3.0));
        assert_eq!(RatingSet::from_ratings(Vec::new()).mean_rating(), None);
    }
}
