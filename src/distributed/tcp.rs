use super::backend::{Communicator, COORDINATOR_RANK};
use crate::error::ClusterError;
use crate::utils::retry_with_backoff;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

const TAG_HELLO: u8 = 0;
const TAG_BYTES: u8 = 1;
const TAG_FLOATS: u8 = 2;
const TAG_SCALAR: u8 = 3;
const TAG_ABORT: u8 = 4;

const CONNECT_ATTEMPTS: usize = 40;

/// One rank of a multi-process worker group.
///
/// The coordinator accepts one connection per peer; peers talk only to the
/// coordinator. Every frame is `tag: u8 | len: u64 LE | payload`.
pub struct TcpCommunicator {
    rank: usize,
    world_size: usize,
    // Coordinator: indexed by peer rank (its own slot is `None`).
    // Peer: a single entry, the coordinator link.
    links: Vec<Option<TcpStream>>,
}

impl TcpCommunicator {
    /// Forms the group. The coordinator binds `addr` and waits for
    /// `world_size - 1` peers; peers retry until the coordinator is up.
    pub fn connect<A: ToSocketAddrs + Clone>(
        rank: usize,
        world_size: usize,
        addr: A,
    ) -> Result<Self, ClusterError> {
        if world_size == 0 || rank >= world_size {
            return Err(ClusterError::Protocol(format!(
                "rank {} is outside a world of {}",
                rank, world_size
            )));
        }

        if rank == COORDINATOR_RANK {
            let listener = TcpListener::bind(addr)?;
            Self::accept_peers(listener, world_size)
        } else {
            let stream = retry_with_backoff(
                || TcpStream::connect(addr.clone()),
                CONNECT_ATTEMPTS,
                Duration::from_millis(50),
                Duration::from_secs(1),
            )?;
            stream.set_nodelay(true)?;
            write_frame(&stream, TAG_HELLO, &(rank as u32).to_le_bytes())?;
            info!("Rank {} joined the worker group", rank);
            Ok(Self {
                rank,
                world_size,
                links: vec![Some(stream)],
            })
        }
    }

    /// Accepts peers on an already-bound listener. Useful when the caller
    /// needs the bound port before peers start (e.g. port 0).
    pub fn accept_peers(listener: TcpListener, world_size: usize) -> Result<Self, ClusterError> {
        let mut links: Vec<Option<TcpStream>> = (0..world_size).map(|_| None).collect();
        info!(
            "Coordinator waiting for {} peers on {}",
            world_size - 1,
            listener.local_addr()?
        );

        for _ in 1..world_size {
            let (stream, peer_addr) = listener.accept()?;
            stream.set_nodelay(true)?;
            let (tag, payload) = read_frame(&stream, None)?;
            if tag != TAG_HELLO || payload.len() != 4 {
                return Err(ClusterError::Protocol(format!(
                    "expected hello from {}, got tag {}",
                    peer_addr, tag
                )));
            }
            let peer = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            if peer == COORDINATOR_RANK || peer >= world_size || links[peer].is_some() {
                return Err(ClusterError::Protocol(format!(
                    "invalid or duplicate rank {} from {}",
                    peer, peer_addr
                )));
            }
            debug!("Rank {} connected from {}", peer, peer_addr);
            links[peer] = Some(stream);
        }

        Ok(Self {
            rank: COORDINATOR_RANK,
            world_size,
            links,
        })
    }

    fn link(&self, rank: usize) -> Result<&TcpStream, ClusterError> {
        let slot = if self.is_coordinator() { rank } else { 0 };
        self.links
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(ClusterError::Disconnected { rank })
    }

    fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.world_size).filter(move |&peer| peer != self.rank)
    }

    fn send(&self, rank: usize, tag: u8, payload: &[u8]) -> Result<(), ClusterError> {
        write_frame(self.link(rank)?, tag, payload).map_err(|e| disconnect_or(rank, e))
    }

    fn receive(&self, rank: usize, expected_tag: u8) -> Result<Vec<u8>, ClusterError> {
        let (tag, payload) = read_frame(self.link(rank)?, Some(rank))?;
        if tag == TAG_ABORT {
            let code = payload
                .get(..4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(1);
            return Err(ClusterError::Aborted { rank, code });
        }
        if tag != expected_tag {
            return Err(ClusterError::Protocol(format!(
                "expected tag {} from rank {}, got {}",
                expected_tag, rank, tag
            )));
        }
        Ok(payload)
    }

    fn receive_floats(&self, rank: usize, expected: usize) -> Result<Vec<f32>, ClusterError> {
        let payload = self.receive(rank, TAG_FLOATS)?;
        let values = decode_floats(&payload)?;
        if values.len() != expected {
            return Err(ClusterError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

impl Communicator for TcpCommunicator {
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
            for peer in self.peers() {
                self.send(peer, TAG_BYTES, &payload)?;
            }
            return Ok(payload);
        }
        self.receive(COORDINATOR_RANK, TAG_BYTES)
    }

    /// Gathers every peer's buffer at the coordinator, sums in rank order
    /// and sends the total back.
    fn all_reduce_sum(&self, buffer: &mut [f32]) -> Result<(), ClusterError> {
        if self.world_size == 1 {
            return Ok(());
        }

        if !self.is_coordinator() {
            self.send(COORDINATOR_RANK, TAG_FLOATS, &encode_floats(buffer)?)?;
            let total = self.receive_floats(COORDINATOR_RANK, buffer.len())?;
            buffer.copy_from_slice(&total);
            return Ok(());
        }

        for peer in self.peers() {
            let partial = self.receive_floats(peer, buffer.len())?;
            for (slot, value) in buffer.iter_mut().zip(partial) {
                *slot += value;
            }
        }
        let encoded = encode_floats(buffer)?;
        for peer in self.peers() {
            self.send(peer, TAG_FLOATS, &encoded)?;
        }
        Ok(())
    }

    fn reduce_sum(&self, value: f64) -> Result<Option<f64>, ClusterError> {
        if !self.is_coordinator() {
            self.send(COORDINATOR_RANK, TAG_SCALAR, &value.to_le_bytes())?;
            return Ok(None);
        }

        let mut total = value;
        for peer in self.peers() {
            let payload = self.receive(peer, TAG_SCALAR)?;
            let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
                ClusterError::Protocol(format!("scalar from rank {} has {} bytes", peer, payload.len()))
            })?;
            total += f64::from_le_bytes(bytes);
        }
        Ok(Some(total))
    }

    fn abort(&self, code: i32) {
        let targets: Vec<usize> = if self.is_coordinator() {
            self.peers().collect()
        } else {
            vec![COORDINATOR_RANK]
        };
        for rank in targets {
            let _ = self.send(rank, TAG_ABORT, &code.to_le_bytes());
        }
    }
}

fn write_frame(mut stream: &TcpStream, tag: u8, payload: &[u8]) -> io::Result<()> {
    let mut header = [0u8; 9];
    header[0] = tag;
    header[1..].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    stream.flush()
}

fn read_frame(mut stream: &TcpStream, rank: Option<usize>) -> Result<(u8, Vec<u8>), ClusterError> {
    let mut header = [0u8; 9];
    let lost = |e: io::Error| match rank {
        Some(rank) => disconnect_or(rank, e),
        None => ClusterError::Io(e),
    };
    stream.read_exact(&mut header).map_err(lost)?;

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[1..]);
    let len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| ClusterError::Protocol("frame length overflows usize".into()))?;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).map_err(lost)?;
    Ok((header[0], payload))
}

fn disconnect_or(rank: usize, error: io::Error) -> ClusterError {
    match error.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ClusterError::Disconnected { rank },
        _ => ClusterError::Io(error),
    }
}

fn encode_floats(values: &[f32]) -> Result<Vec<u8>, ClusterError> {
    Ok(bincode::serialize(values)?)
}

fn decode_floats(bytes: &[u8]) -> Result<Vec<f32>, ClusterError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_group(world_size: usize) -> Vec<thread::JoinHandle<(Vec<f32>, Option<f64>, Vec<u8>)>> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut handles = vec![thread::spawn(move || {
            let comm = TcpCommunicator::accept_peers(listener, world_size).unwrap();
            exercise(&comm)
        })];
        for rank in 1..world_size {
            handles.push(thread::spawn(move || {
                let comm = TcpCommunicator::connect(rank, world_size, addr).unwrap();
                exercise(&comm)
            }));
        }
        handles
    }

    fn exercise(comm: &TcpCommunicator) -> (Vec<f32>, Option<f64>, Vec<u8>) {
        let mut buffer = vec![comm.rank() as f32 + 1.0; 6];
        comm.all_reduce_sum(&mut buffer).unwrap();
        let total = comm.reduce_sum(0.5).unwrap();
        let bytes = comm
            .broadcast(comm.is_coordinator().then(|| vec![7, 8, 9]))
            .unwrap();
        (buffer, total, bytes)
    }

    #[test]
    fn test_tcp_group_collectives() {
        let results: Vec<_> = spawn_group(3)
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        for (rank, (buffer, total, bytes)) in results.iter().enumerate() {
            assert!(buffer.iter().all(|&v| v == 6.0));
            assert_eq!(bytes, &vec![7, 8, 9]);
            if rank == COORDINATOR_RANK {
                assert_eq!(*total, Some(1.5));
            } else {
                assert_eq!(*total, None);
            }
        }
    }

    #[test]
    fn test_float_codec() {
        let values = [0.1f32, -2.5, f32::MAX];
        let encoded = encode_floats(&values).unwrap();
        assert_eq!(decode_floats(&encoded).unwrap(), values.to_vec());
        assert!(matches!(
            decode_floats(&encoded[..encoded.len() - 1]),
            Err(ClusterError::Codec(_))
        ));
    }

    #[test]
    fn test_rank_outside_world_rejected() {
        assert!(matches!(
            TcpCommunicator::connect(3, 2, "127.0.0.1:1"),
            Err(ClusterError::Protocol(_))
        ));
    }
}
