//! Salt generation and the server-side challenge table.
//!
//! A pending client is remembered in the [`ChallengeTable`] between its first connection
//! request and the response that proves it received the challenge. The table is a fixed
//! array indexed by a keyed hash of `(address, client_salt)`. The key is the server's random
//! salt, so a remote peer cannot pick inputs that collide on purpose.

use crate::error::Result;
use crate::transport::format_address;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hash::Hasher;
use std::io;
use std::net::SocketAddr;
use tracing::trace;
use twox_hash::XxHash64;

/// Fresh random 64-bit value from the operating system.
pub fn random_u64() -> Result<u64> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Deterministic generator seeded from the operating system.
pub fn seeded_rng() -> Result<StdRng> {
    Ok(StdRng::seed_from_u64(random_u64()?))
}

/// Draw a salt. Zero is reserved for "no salt".
pub fn generate_salt(rng: &mut impl Rng) -> u64 {
    loop {
        let salt = rng.random::<u64>();
        if salt != 0 {
            return salt;
        }
    }
}

/// A client that has been challenged but has not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeEntry {
    pub address: SocketAddr,
    pub client_salt: u64,
    pub challenge_salt: u64,
    pub create_time: f64,
    pub last_send_time: f64,
}

impl ChallengeEntry {
    fn is_expired(&self, time: f64, timeout: f64) -> bool {
        self.create_time + timeout < time
    }

    fn matches(&self, address: &SocketAddr, client_salt: u64) -> bool {
        self.client_salt == client_salt && self.address == *address
    }
}

/// Fixed-size table of pending challenges.
#[derive(Debug)]
pub struct ChallengeTable {
    entries: Vec<Option<ChallengeEntry>>,
    server_salt: u64,
    timeout: f64,
}

impl ChallengeTable {
    pub fn new(size: usize, server_salt: u64, timeout: f64) -> Self {
        Self {
            entries: vec![None; size.max(1)],
            server_salt,
            timeout,
        }
    }

    pub fn server_salt(&self) -> u64 {
        self.server_salt
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Live (unexpired) entries.
    pub fn len(&self, time: f64) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|entry| !entry.is_expired(time, self.timeout))
            .count()
    }

    pub fn is_empty(&self, time: f64) -> bool {
        self.len(time) == 0
    }

    pub fn slot_index(&self, address: &SocketAddr, client_salt: u64) -> usize {
        let mut hasher = XxHash64::with_seed(self.server_salt);
        hasher.write(format_address(address).as_bytes());
        hasher.write_u64(client_salt);
        hasher.write_u64(self.server_salt);
        (hasher.finish() % self.entries.len() as u64) as usize
    }

    /// Look up an unexpired entry for `(address, client_salt)`.
    pub fn find(&self, address: &SocketAddr, client_salt: u64, time: f64) -> Option<&ChallengeEntry> {
        let index = self.slot_index(address, client_salt);
        self.entries[index]
            .as_ref()
            .filter(|entry| entry.matches(address, client_salt) && !entry.is_expired(time, self.timeout))
    }

    pub fn find_mut(
        &mut self,
        address: &SocketAddr,
        client_salt: u64,
        time: f64,
    ) -> Option<&mut ChallengeEntry> {
        let index = self.slot_index(address, client_salt);
        let timeout = self.timeout;
        self.entries[index]
            .as_mut()
            .filter(|entry| entry.matches(address, client_salt) && !entry.is_expired(time, timeout))
    }

    /// Return the live entry for `(address, client_salt)`, creating one if the slot is free.
    ///
    /// A new entry gets a fresh challenge salt and a send time far enough in the past that
    /// the first challenge goes out immediately. Returns `None` when the slot is held by a
    /// different live entry.
    pub fn find_or_insert(
        &mut self,
        address: SocketAddr,
        client_salt: u64,
        time: f64,
        send_rate: f64,
        rng: &mut impl Rng,
    ) -> Option<&mut ChallengeEntry> {
        let index = self.slot_index(&address, client_salt);
        let timeout = self.timeout;
        let slot = &mut self.entries[index];

        let reusable = match slot {
            None => true,
            Some(entry) => entry.is_expired(time, timeout),
        };
        if reusable {
            let challenge_salt = generate_salt(rng);
            trace!(index, address = %address, "challenge entry inserted");
            *slot = Some(ChallengeEntry {
                address,
                client_salt,
                challenge_salt,
                create_time: time,
                last_send_time: time - 2.0 * send_rate,
            });
        }

        slot.as_mut().filter(|entry| entry.matches(&address, client_salt))
    }
}
