use crate::distributed::{broadcast_value, Communicator};
use crate::error::{ClusterError, MfError, Result};
use crate::models::{Rating, RatingSet};
use crate::utils::validation::validate_rating;
use csv::{ByteRecord, ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{error, info};

/// Exit code peers are told to use when the coordinator cannot load the input.
pub const LOAD_ABORT_CODE: i32 = 1;

/// `userId,itemId,rating,timestamp`, matched by position.
type RatingRow = (u32, u32, f32, i64);

/// Sent ahead of the row blob so peers can check what they decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DatasetHeader {
    count: u64,
    max_user_id: u32,
    max_item_id: u32,
}

/// Loads the rating file on the coordinator and replicates it to every rank.
///
/// Only the coordinator touches `path`. If it fails, it aborts the group so
/// that peers waiting on the broadcast fail with [`ClusterError::Aborted`]
/// instead of blocking.
pub fn load(path: &Path, comm: &dyn Communicator) -> Result<RatingSet> {
    let parsed = if comm.is_coordinator() {
        match parse_file(path) {
            Ok(set) => {
                info!(
                    "Loaded {} ratings (max user id {}, max item id {})",
                    set.count(),
                    set.max_user_id(),
                    set.max_item_id()
                );
                Some(set)
            }
            Err(e) => {
                error!("Failed to load ratings from {}: {}", path.display(), e);
                comm.abort(LOAD_ABORT_CODE);
                return Err(e);
            }
        }
    } else {
        None
    };

    replicate(parsed, comm)
}

/// Two passes over the file: count the data rows, then parse them into a
/// buffer of exactly that size.
pub fn parse_file(path: &Path) -> Result<RatingSet> {
    let count = count_rows(path)?;

    let mut reader = open_reader(path, false)?;
    let mut ratings = Vec::with_capacity(count);
    let mut max_user_id = 0u32;
    let mut max_item_id = 0u32;

    for (index, row) in reader.deserialize::<RatingRow>().enumerate() {
        let (user_id, item_id, rating, timestamp) = row.map_err(|e| row_error(e, index))?;
        let rating = Rating::new(user_id, item_id, rating, timestamp);
        validate_rating(&rating, index as u64 + 2)?;

        max_user_id = max_user_id.max(user_id);
        max_item_id = max_item_id.max(item_id);
        ratings.push(rating);
    }

    if ratings.len() != count {
        return Err(MfError::MalformedRow {
            line: ratings.len() as u64 + 2,
            reason: format!("file changed while loading: counted {} rows, parsed {}", count, ratings.len()),
        });
    }

    Ok(RatingSet::from_parts(ratings, max_user_id, max_item_id))
}

fn open_reader(path: &Path, flexible: bool) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| MfError::io(path, e))?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(flexible)
        .trim(Trim::All)
        .from_reader(file))
}

/// Counts data rows without validating them; the parse pass reports bad rows.
fn count_rows(path: &Path) -> Result<usize> {
    let mut reader = open_reader(path, true)?;
    let mut record = ByteRecord::new();
    let mut count = 0;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

fn row_error(e: csv::Error, index: usize) -> MfError {
    if e.is_io_error() {
        return MfError::Csv(e);
    }
    let line = e
        .position()
        .map(|position| position.line())
        .unwrap_or(index as u64 + 2);
    MfError::MalformedRow {
        line,
        reason: e.to_string(),
    }
}

fn replicate(parsed: Option<RatingSet>, comm: &dyn Communicator) -> Result<RatingSet> {
    let header = parsed.as_ref().map(|set| DatasetHeader {
        count: set.count() as u64,
        max_user_id: set.max_user_id(),
        max_item_id: set.max_item_id(),
    });
    let header: DatasetHeader = broadcast_value(comm, header.as_ref())?;

    let blob = parsed
        .as_ref()
        .map(|set| bincode::serialize(set.ratings()))
        .transpose()
        .map_err(ClusterError::from)?;
    let blob = comm.broadcast(blob)?;

    if let Some(set) = parsed {
        return Ok(set);
    }

    let ratings: Vec<Rating> = bincode::deserialize(&blob).map_err(ClusterError::from)?;
    if ratings.len() as u64 != header.count {
        return Err(ClusterError::LengthMismatch {
            expected: header.count as usize,
            actual: ratings.len(),
        }
        .into());
    }

    Ok(RatingSet::from_parts(
        ratings,
        header.max_user_id,
        header.max_item_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalCluster;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("ratings.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const SCENARIO: &str = "userId,movieId,rating,timestamp\n1,1,5.0,0\n1,2,1.0,0\n2,1,4.0,0\n2,2,2.0,0\n";

    #[test]
    fn test_parse_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "userId,movieId,rating,timestamp\n7,31,2.5,1260759144\n1,1029,3.0,1260759179\n");

        let set = parse_file(&path).unwrap();
        assert_eq!(set.count(), 2);
        assert_eq!(set.ratings()[0], Rating::new(7, 31, 2.5, 1260759144));
        assert_eq!(set.max_user_id(), 7);
        assert_eq!(set.max_item_id(), 1029);
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "userId,movieId,rating,timestamp\n");
        assert!(parse_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_rows_are_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_csv(&dir, "userId,movieId,rating,timestamp\n1,1,5.0,0\n-3,2,1.0,0\n");
        assert!(matches!(parse_file(&path), Err(MfError::MalformedRow { line: 3, .. })));

        let path = write_csv(&dir, "userId,movieId,rating,timestamp\n1,1,5.0\n");
        assert!(matches!(parse_file(&path), Err(MfError::MalformedRow { .. })));

        let path = write_csv(&dir, "userId,movieId,rating,timestamp\n1,1,five,0\n");
        assert!(matches!(parse_file(&path), Err(MfError::MalformedRow { line: 2, .. })));
    }

    #[test]
    fn test_every_rank_receives_identical_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, SCENARIO);

        let sets = LocalCluster::run(3, |comm| load(&path, &comm).unwrap()).unwrap();
        assert_eq!(sets[0].count(), 4);
        assert!(sets.iter().all(|set| *set == sets[0]));
    }

    #[test]
    fn test_missing_file_aborts_every_rank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");

        let results = LocalCluster::run(3, |comm| load(&path, &comm)).unwrap();
        assert!(matches!(results[0], Err(MfError::Io { .. })));
        for result in &results[1..] {
            assert!(matches!(
                result,
                Err(MfError::Cluster(ClusterError::Aborted { rank: 0, code: LOAD_ABORT_CODE }))
            ));
        }
    }
}
