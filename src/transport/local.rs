//! In-memory datagram network.
//!
//! Every [`LocalSocket`] bound on a [`LocalNetwork`] gets its own inbound queue. Delivery is
//! instant and ordered unless a drop rate is configured, in which case datagrams are
//! discarded at random (seeded, so runs are reproducible). Sending to an address nobody is
//! bound on silently drops the datagram, the same as UDP.

use crate::error::{constants, ProtocolError, Result};
use crate::transport::DatagramSocket;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Debug)]
struct NetworkState {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    drop_rate: f64,
    rng: StdRng,
    delivered: u64,
    dropped: u64,
}

/// Delivery counters for a [`LocalNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Shared handle to an in-memory network. Cloning yields another handle to the same network.
#[derive(Debug, Clone)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNetwork {
    /// A lossless network.
    pub fn new() -> Self {
        Self::with_drop_rate(0.0, 0)
    }

    /// A network that drops each datagram with probability `drop_rate`.
    pub fn with_drop_rate(drop_rate: f64, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                queues: HashMap::new(),
                drop_rate: drop_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, NetworkState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::TransportError("Local network lock poisoned".to_string()))
    }

    /// Bind a socket at `address`.
    pub fn bind(&self, address: SocketAddr) -> Result<LocalSocket> {
        let mut state = self.lock()?;
        if state.queues.contains_key(&address) {
            return Err(ProtocolError::TransportError(format!(
                "{}: {address}",
                constants::ERR_ADDRESS_IN_USE
            )));
        }
        state.queues.insert(address, VecDeque::new());
        Ok(LocalSocket {
            address,
            network: self.clone(),
        })
    }

    pub fn set_drop_rate(&self, drop_rate: f64) -> Result<()> {
        self.lock()?.drop_rate = drop_rate.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn stats(&self) -> Result<NetworkStats> {
        let state = self.lock()?;
        Ok(NetworkStats {
            delivered: state.delivered,
            dropped: state.dropped,
        })
    }

    /// Datagrams waiting at `address`.
    pub fn pending(&self, address: SocketAddr) -> Result<usize> {
        Ok(self.lock()?.queues.get(&address).map_or(0, VecDeque::len))
    }
}

/// One bound address on a [`LocalNetwork`]. Unbinds on drop.
#[derive(Debug)]
pub struct LocalSocket {
    address: SocketAddr,
    network: LocalNetwork,
}

impl DatagramSocket for LocalSocket {
    fn send_datagram(&mut self, to: SocketAddr, data: &[u8]) -> Result<()> {
        let mut state = self.network.lock()?;
        let drop_rate = state.drop_rate;
        if drop_rate > 0.0 && state.rng.random::<f64>() < drop_rate {
            state.dropped += 1;
            trace!(from = %self.address, to = %to, bytes = data.len(), "datagram dropped");
            return Ok(());
        }

        match state.queues.get_mut(&to) {
            Some(queue) => {
                queue.push_back((self.address, data.to_vec()));
                state.delivered += 1;
            }
            None => {
                state.dropped += 1;
                trace!(to = %to, "no socket bound at destination");
            }
        }
        Ok(())
    }

    fn receive_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let mut state = self.network.lock()?;
        let queue = state.queues.get_mut(&self.address).ok_or_else(|| {
            ProtocolError::TransportError(constants::ERR_SOCKET_CLOSED.to_string())
        })?;

        Ok(queue.pop_front().map(|(from, data)| {
            // truncated like a real recvfrom when the buffer is too small
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            (len, from)
        }))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.address)
    }
}

impl Drop for LocalSocket {
    fn drop(&mut self) {
        if let Ok(mut state) = self.network.lock() {
            state.queues.remove(&self.address);
        }
    }
}
