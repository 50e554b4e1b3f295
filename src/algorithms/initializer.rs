use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound of the initial feature values.
pub const INIT_SCALE: f32 = 0.1;

/// Seed for one worker. Ranks start from different points so that
/// averaging combines distinct trajectories.
pub fn worker_seed(base_seed: u64, rank: usize) -> u64 {
    base_seed.wrapping_add(rank as u64)
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Overwrites every value with `uniform[0, 1) * scale`, in iteration order.
pub fn fill_scaled_uniform<'a, I, R>(values: I, rng: &mut R, scale: f32)
where
    I: IntoIterator<Item = &'a mut f32>,
    R: Rng + ?Sized,
{
    for value in values {
        *value = rng.gen::<f32>() * scale;
    }
}
