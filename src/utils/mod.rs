use std::ops::Range;
use std::time::Duration;

pub mod metrics;
pub mod validation;

/// Contiguous shard of `count` rows owned by `rank`.
///
/// Every rank gets `count / world_size` rows; the last rank also takes the
/// remainder.
pub fn partition_range(count: usize, rank: usize, world_size: usize) -> Range<usize> {
    let world_size = world_size.max(1);
    let chunk = count / world_size;
    let start = chunk * rank;
    let end = if rank + 1 == world_size {
        count
    } else {
        chunk * (rank + 1)
    };
    start..end
}

/// Iterations between parameter averaging rounds for a given group size.
/// Larger groups pay more per round, so they sync less often.
pub fn sync_interval_for(world_size: usize) -> usize {
    if world_size <= 2 {
        3
    } else if world_size >= 8 {
        10
    } else {
        5
    }
}

/// Seed derived from the wall clock, for runs without a configured seed.
pub fn clock_seed() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i, score))
        .collect();

    indexed_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    indexed_scores
        .into_iter()
        .take(k)
        .map(|(i, _)| i)
        .collect()
}

/// Retries `operation` with exponential backoff capped at `max_delay`.
pub fn retry_with_backoff<F, T, E>(
    mut operation: F,
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Debug,
{
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                tracing::debug!(
                    "Operation failed (attempt {}), retrying in {:?}: {:?}",
                    attempt,
                    delay,
                    e
                );
                std::thread::sleep(delay);
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_covers_every_row_once() {
        for count in [0usize, 1, 7, 10, 101] {
            for world_size in 1..=9 {
                let mut next = 0;
                for rank in 0..world_size {
                    let range = partition_range(count, rank, world_size);
                    assert_eq!(range.start, next, "gap or overlap at rank {}", rank);
                    next = range.end;
                }
                assert_eq!(next, count);
            }
        }
    }

    #[test]
    fn test_last_shard_absorbs_remainder() {
        assert_eq!(partition_range(10, 0, 3), 0..3);
        assert_eq!(partition_range(10, 1, 3), 3..6);
        assert_eq!(partition_range(10, 2, 3), 6..10);
        assert_eq!(partition_range(2, 3, 4), 0..2);
        assert_eq!(partition_range(2, 0, 4), 0..0);
    }

    #[test]
    fn test_sync_interval_heuristic() {
        assert_eq!(sync_interval_for(1), 3);
        assert_eq!(sync_interval_for(2), 3);
        assert_eq!(sync_interval_for(3), 5);
        assert_eq!(sync_interval_for(7), 5);
        assert_eq!(sync_interval_for(8), 10);
        assert_eq!(sync_interval_for(64), 10);
    }

    #[test]
    fn test_top_k_indices() {
        let scores = vec![0.1, 0.5, 0.3, 0.9, 0.2];
        let top_2 = top_k_indices(&scores, 2);
        assert_eq!(top_2, vec![3, 1]);
    }

    #[test]
    fn test_retry_with_backoff_gives_up() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            || {
                calls += 1;
                Err("down")
            },
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
        );
        assert_eq!(result, Err("down"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_with_backoff_recovers() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry_with_backoff(
            || {
                calls += 1;
                if calls < 2 { Err("not yet") } else { Ok(calls) }
            },
            5,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        assert_eq!(result, Ok(2));
    }
}
