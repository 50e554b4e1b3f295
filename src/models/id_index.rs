use super::{IdSpace, RatingSet};
use crate::error::{MfError, Result};

/// Bijection between sparse catalog ids and contiguous dense indices.
///
/// Dense indices follow ascending sparse-id order, so two builds over the
/// same rows always agree regardless of row order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdIndex {
    user_forward: Vec<Option<u32>>,
    item_forward: Vec<Option<u32>>,
    user_reverse: Vec<u32>,
    item_reverse: Vec<u32>,
}

impl IdIndex {
    pub fn build(set: &RatingSet) -> Result<Self> {
        if set.id_space() != IdSpace::Sparse {
            return Err(MfError::AlreadyRemapped);
        }

        let mut user_seen = vec![false; set.max_user_id() as usize + 1];
        let mut item_seen = vec![false; set.max_item_id() as usize + 1];
        for rating in set.ratings() {
            user_seen[rating.user_id as usize] = true;
            item_seen[rating.item_id as usize] = true;
        }

        let (user_forward, user_reverse) = assign_dense(&user_seen);
        let (item_forward, item_reverse) = assign_dense(&item_seen);

        Ok(Self {
            user_forward,
            item_forward,
            user_reverse,
            item_reverse,
        })
    }

    /// Rewrites every row from sparse ids to dense indices. Runs once per set.
    pub fn apply(&self, set: &mut RatingSet) -> Result<()> {
        if set.id_space() != IdSpace::Sparse {
            return Err(MfError::AlreadyRemapped);
        }

        if let Some((line, rating)) = set.ratings().iter().enumerate().find(|(_, r)| {
            self.user_dense(r.user_id).is_none() || self.item_dense(r.item_id).is_none()
        }) {
            return Err(MfError::MalformedRow {
                line: line as u64 + 2,
                reason: format!(
                    "ids ({}, {}) are not covered by the index",
                    rating.user_id, rating.item_id
                ),
            });
        }

        for rating in set.ratings_mut() {
            rating.user_id = self.user_forward[rating.user_id as usize].unwrap_or_default();
            rating.item_id = self.item_forward[rating.item_id as usize].unwrap_or_default();
        }

        set.mark_dense(self.num_users(), self.num_items());
        Ok(())
    }

    pub fn num_users(&self) -> usize {
        self.user_reverse.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_reverse.len()
    }

    pub fn user_dense(&self, sparse: u32) -> Option<u32> {
        self.user_forward.get(sparse as usize).copied().flatten()
    }

    pub fn item_dense(&self, sparse: u32) -> Option<u32> {
        self.item_forward.get(sparse as usize).copied().flatten()
    }

    pub fn user_sparse(&self, dense: u32) -> Option<u32> {
        self.user_reverse.get(dense as usize).copied()
    }

    pub fn item_sparse(&self, dense: u32) -> Option<u32> {
        self.item_reverse.get(dense as usize).copied()
    }

    /// Original item id for each dense item index, in index order.
    pub fn reverse_item_ids(&self) -> &[u32] {
        &self.item_reverse
    }

    pub fn reverse_user_ids(&self) -> &[u32] {
        &self.user_reverse
    }
}

fn assign_dense(seen: &[bool]) -> (Vec<Option<u32>>, Vec<u32>) {
    let mut forward = vec![None; seen.len()];
    let mut reverse = Vec::new();
    for (sparse, _) in seen.iter().enumerate().filter(|&(_, &present)| present) {
        forward[sparse] = Some(reverse.len() as u32);
        reverse.push(sparse as u32);
    }
    (forward, reverse)
}
