//! Collective communication between the workers of one training job.
//!
//! Workers run the same program in lockstep (SPMD). The only points where
//! they wait on each other are the collectives of [`Communicator`]:
//! broadcast of the dataset, the periodic parameter all-reduce, and the
//! final error reduction. Two backends are provided:
//!
//! * [`LocalCluster`] / [`ChannelCommunicator`]: workers are threads of one
//!   process connected by channels. Used by the `mfrec` binary and tests.
//! * [`TcpCommunicator`]: workers are separate processes connected to the
//!   coordinator over TCP. Used by `mfrec-worker`.

pub mod backend;
pub mod local;
pub mod tcp;

pub use backend::{Communicator, COORDINATOR_RANK};
pub use local::{ChannelCommunicator, LocalCluster};
pub use tcp::TcpCommunicator;

use crate::error::ClusterError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Broadcasts a serializable value from the coordinator.
///
/// The coordinator passes `Some(value)`; other ranks pass `None`.
pub fn broadcast_value<T>(comm: &dyn Communicator, value: Option<&T>) -> Result<T, ClusterError>
where
    T: Serialize + DeserializeOwned,
{
    let payload = value.map(bincode::serialize).transpose()?;
    let bytes = comm.broadcast(payload)?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_value_reaches_every_rank() {
        let results = LocalCluster::run(3, |comm| {
            let value = comm.is_coordinator().then(|| (42u64, 3.5f64));
            broadcast_value(&comm, value.as_ref()).unwrap()
        })
        .unwrap();
        assert_eq!(results, vec![(42, 3.5); 3]);
    }
}
