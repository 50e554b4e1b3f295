use crate::error::ClusterError;

/// Rank that owns file I/O and reduction results.
pub const COORDINATOR_RANK: usize = 0;

/// Rank-aware collective operations shared by every worker of a job.
///
/// All methods are blocking barriers: each rank must call the same sequence
/// of collectives, in the same order, with compatible arguments.
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR_RANK
    }

    /// Distributes the coordinator's payload to every rank.
    ///
    /// The coordinator passes `Some(bytes)`, every other rank passes `None`;
    /// all ranks return the coordinator's bytes.
    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>, ClusterError>;

    /// Element-wise sum across all ranks, written back into `buffer` on every rank.
    fn all_reduce_sum(&self, buffer: &mut [f32]) -> Result<(), ClusterError>;

    /// Sums one scalar per rank. Only the coordinator receives `Some(total)`.
    fn reduce_sum(&self, value: f64) -> Result<Option<f64>, ClusterError>;

    /// Tells every reachable peer that the job is over. Peers blocked in a
    /// collective with this rank fail with [`ClusterError::Aborted`].
    fn abort(&self, code: i32);
}
