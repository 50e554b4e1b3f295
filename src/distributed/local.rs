use super::backend::{Communicator, COORDINATOR_RANK};
use crate::error::ClusterError;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::thread;

#[derive(Debug)]
enum Packet {
    Bytes(Vec<u8>),
    Floats(Vec<f32>),
    Scalar(f64),
    Abort { rank: usize, code: i32 },
}

/// One rank of an in-process worker group.
///
/// Every ordered pair of ranks gets its own channel, so a receive from a
/// given peer never observes another peer's traffic. Ownership of each
/// message moves through the channel; ranks share no mutable state.
pub struct ChannelCommunicator {
    rank: usize,
    world_size: usize,
    // Indexed by destination rank.
    senders: Vec<Sender<Packet>>,
    // Indexed by source rank.
    receivers: Vec<Receiver<Packet>>,
}

/// Builds and drives groups of [`ChannelCommunicator`]s.
pub struct LocalCluster;

impl LocalCluster {
    /// Wires `world_size` communicators, returned in rank order.
    pub fn new(world_size: usize) -> Vec<ChannelCommunicator> {
        let world_size = world_size.max(1);
        let mut senders: Vec<Vec<Sender<Packet>>> = (0..world_size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Packet>>> =
            (0..world_size).map(|_| Vec::new()).collect();

        for from in 0..world_size {
            for to in 0..world_size {
                let (tx, rx) = unbounded();
                senders[from].push(tx);
                receivers[to].push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelCommunicator {
                rank,
                world_size,
                senders,
                receivers,
            })
            .collect()
    }

    /// Runs `worker` once per rank, each on its own thread, and returns the
    /// results in rank order. A panicking worker is re-raised on the caller.
    pub fn run<F, T>(world_size: usize, worker: F) -> Result<Vec<T>, ClusterError>
    where
        F: Fn(ChannelCommunicator) -> T + Sync,
        T: Send,
    {
        let comms = Self::new(world_size);
        let worker = &worker;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(comms.len());
            for comm in comms {
                let handle = thread::Builder::new()
                    .name(format!("mfrec-worker-{}", comm.rank))
                    .spawn_scoped(scope, move || worker(comm))?;
                handles.push(handle);
            }

            Ok(handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect())
        })
    }
}

impl ChannelCommunicator {
    fn send_to(&self, rank: usize, packet: Packet) -> Result<(), ClusterError> {
        self.senders[rank]
            .send(packet)
            .map_err(|_| ClusterError::Disconnected { rank })
    }

    fn recv_from(&self, rank: usize) -> Result<Packet, ClusterError> {
        match self.receivers[rank].recv() {
            Ok(Packet::Abort { rank, code }) => Err(ClusterError::Aborted { rank, code }),
            Ok(packet) => Ok(packet),
            Err(_) => Err(ClusterError::Disconnected { rank }),
        }
    }

    fn recv_floats(&self, rank: usize, expected: usize) -> Result<Vec<f32>, ClusterError> {
        match self.recv_from(rank)? {
            Packet::Floats(values) if values.len() == expected => Ok(values),
            Packet::Floats(values) => Err(ClusterError::LengthMismatch {
                expected,
                actual: values.len(),
            }),
            other => Err(unexpected(rank, &other)),
        }
    }

    fn chunk_bounds(&self, chunk: usize, len: usize) -> (usize, usize) {
        let chunk_size = len.div_ceil(self.world_size);
        let start = (chunk * chunk_size).min(len);
        let end = (start + chunk_size).min(len);
        (start, end)
    }

    fn ring_offset(&self, back: usize) -> usize {
        (self.rank + self.world_size * 2 - back) % self.world_size
    }
}

fn unexpected(rank: usize, packet: &Packet) -> ClusterError {
    let kind = match packet {
        Packet::Bytes(_) => "bytes",
        Packet::Floats(_) => "floats",
        Packet::Scalar(_) => "scalar",
        Packet::Abort { .. } => "abort",
    };
    ClusterError::Protocol(format!("unexpected {} packet from rank {}", kind, rank))
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>, ClusterError> {
        if self.is_coordinator() {
            let payload = payload.ok_or_else(|| {
                ClusterError::Protocol("coordinator must supply the broadcast payload".into())
            })?;
            for peer in (0..self.world_size).filter(|&peer| peer != self.rank) {
                self.send_to(peer, Packet::Bytes(payload.clone()))?;
            }
            return Ok(payload);
        }

        match self.recv_from(COORDINATOR_RANK)? {
            Packet::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected(COORDINATOR_RANK, &other)),
        }
    }

    /// Ring all-reduce: a scatter-reduce pass leaves each rank owning one
    /// fully summed chunk, then an all-gather pass circulates those chunks.
    /// Every rank finishes with bit-identical contents.
    fn all_reduce_sum(&self, buffer: &mut [f32]) -> Result<(), ClusterError> {
        if self.world_size == 1 {
            return Ok(());
        }

        let len = buffer.len();
        let left = self.ring_offset(1);
        let right = (self.rank + 1) % self.world_size;

        for step in 0..self.world_size - 1 {
            let (send_start, send_end) = self.chunk_bounds(self.ring_offset(step), len);
            let (recv_start, recv_end) = self.chunk_bounds(self.ring_offset(step + 1), len);

            self.send_to(right, Packet::Floats(buffer[send_start..send_end].to_vec()))?;
            let incoming = self.recv_floats(left, recv_end - recv_start)?;
            for (slot, value) in buffer[recv_start..recv_end].iter_mut().zip(incoming) {
                *slot += value;
            }
        }

        for step in 0..self.world_size - 1 {
            let (send_start, send_end) =
                self.chunk_bounds((self.rank + 1 + self.world_size - step) % self.world_size, len);
            let (recv_start, recv_end) = self.chunk_bounds(self.ring_offset(step), len);

            self.send_to(right, Packet::Floats(buffer[send_start..send_end].to_vec()))?;
            let incoming = self.recv_floats(left, recv_end - recv_start)?;
            buffer[recv_start..recv_end].copy_from_slice(&incoming);
        }

        Ok(())
    }

    fn reduce_sum(&self, value: f64) -> Result<Option<f64>, ClusterError> {
        if !self.is_coordinator() {
            self.send_to(COORDINATOR_RANK, Packet::Scalar(value))?;
            return Ok(None);
        }

        let mut total = value;
        for peer in (0..self.world_size).filter(|&peer| peer != self.rank) {
            match self.recv_from(peer)? {
                Packet::Scalar(partial) => total += partial,
                other => return Err(unexpected(peer, &other)),
            }
        }
        Ok(Some(total))
    }

    fn abort(&self, code: i32) {
        for peer in (0..self.world_size).filter(|&peer| peer != self.rank) {
            // Peers that already exited have dropped their receivers.
            let _ = self.send_to(peer, Packet::Abort { rank: self.rank, code });
        }
    }
}
