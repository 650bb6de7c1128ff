//! Server side of the connection handshake.
//!
//! The server owns a fixed array of client slots and a [`ChallengeTable`] for clients that
//! are part way through the handshake. Like the client it is a pure state machine driven by
//! explicit timestamps; replies are queued and collected with [`Server::drain_outgoing`].

use crate::config::{ServerConfig, ServerTiming, MAX_CLIENTS};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{generate_salt, seeded_rng, ChallengeTable};
use crate::protocol::message::{DenyReason, Message};
use crate::utils::metrics::global_metrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use tracing::{debug, info, trace};

/// A connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSlot {
    pub address: SocketAddr,
    pub client_salt: u64,
    pub challenge_salt: u64,
    pub connect_time: f64,
    pub last_packet_send_time: f64,
    pub last_packet_receive_time: f64,
}

impl ClientSlot {
    fn is(&self, address: &SocketAddr, client_salt: u64, challenge_salt: u64) -> bool {
        self.address == *address
            && self.client_salt == client_salt
            && self.challenge_salt == challenge_salt
    }
}

/// Why a client slot was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The client sent a disconnect.
    ClientRequested,
    /// The server application asked for it.
    ServerRequested,
    /// No packet within the keep-alive timeout.
    TimedOut,
}

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        client_index: usize,
        address: SocketAddr,
    },
    ClientDisconnected {
        client_index: usize,
        address: SocketAddr,
        reason: DisconnectReason,
    },
    Payload {
        client_index: usize,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct Server {
    timing: ServerTiming,
    slots: Vec<Option<ClientSlot>>,
    num_connected: usize,
    challenges: ChallengeTable,
    rng: StdRng,
    outgoing: Vec<(SocketAddr, Message)>,
    events: Vec<ServerEvent>,
}

impl Server {
    /// Create a server whose salts come from a generator seeded with `seed`.
    ///
    /// `max_clients` is clamped to `[1, MAX_CLIENTS]`.
    pub fn new(config: &ServerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Create a server seeded from the operating system.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self::with_rng(config, seeded_rng()?))
    }

    fn with_rng(config: &ServerConfig, mut rng: StdRng) -> Self {
        let timing = config.timing();
        let max_clients = config.max_clients.clamp(1, MAX_CLIENTS);
        let server_salt = generate_salt(&mut rng);
        Self {
            timing,
            slots: vec![None; max_clients],
            num_connected: 0,
            challenges: ChallengeTable::new(
                config.challenge_hash_size,
                server_salt,
                timing.challenge_timeout,
            ),
            rng,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.slots.len()
    }

    pub fn num_connected(&self) -> usize {
        self.num_connected
    }

    pub fn is_full(&self) -> bool {
        self.num_connected == self.slots.len()
    }

    pub fn client(&self, client_index: usize) -> Option<&ClientSlot> {
        self.slots.get(client_index).and_then(Option::as_ref)
    }

    pub fn is_client_connected(&self, client_index: usize) -> bool {
        self.client(client_index).is_some()
    }

    pub fn challenges(&self) -> &ChallengeTable {
        &self.challenges
    }

    pub fn timing(&self) -> &ServerTiming {
        &self.timing
    }

    /// Slot for the exact session `(address, client_salt, challenge_salt)`.
    pub fn find_client_index(
        &self,
        address: &SocketAddr,
        client_salt: u64,
        challenge_salt: u64,
    ) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|slot| slot.is(address, client_salt, challenge_salt))
        })
    }

    /// Slot already holding `(address, client_salt)`, whatever its challenge salt.
    pub fn find_existing_client_index(&self, address: &SocketAddr, client_salt: u64) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|slot| slot.address == *address && slot.client_salt == client_salt)
        })
    }

    /// Slot connected from `address`, used to route fragments before they are decoded.
    ///
    /// A client that reconnects before its old slot times out holds two slots; the most
    /// recently connected one wins.
    pub fn find_client_by_address(&self, address: &SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, slot)))
            .filter(|(_, slot)| slot.address == *address)
            .max_by(|(_, a), (_, b)| a.connect_time.total_cmp(&b.connect_time))
            .map(|(index, _)| index)
    }

    fn find_free_client_index(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn send_to_client(&mut self, client_index: usize, message: Message, time: f64) {
        if let Some(slot) = self.slots.get_mut(client_index).and_then(Option::as_mut) {
            trace!(
                client_index,
                to = %slot.address,
                packet = message.packet_type().name(),
                "server queued packet"
            );
            slot.last_packet_send_time = time;
            self.outgoing.push((slot.address, message));
        }
    }

    fn send_to_address(&mut self, address: SocketAddr, message: Message) {
        trace!(to = %address, packet = message.packet_type().name(), "server queued packet");
        self.outgoing.push((address, message));
    }

    /// Handle one message received from `address`.
    pub fn process_message(&mut self, address: SocketAddr, message: Message, time: f64) {
        match message {
            Message::ConnectionRequest { client_salt } => {
                self.process_connection_request(address, client_salt, time)
            }
            Message::ConnectionResponse {
                client_salt,
                challenge_salt,
            } => self.process_connection_response(address, client_salt, challenge_salt, time),
            Message::ConnectionKeepAlive {
                client_salt,
                challenge_salt,
            } => {
                if let Some(index) = self.find_client_index(&address, client_salt, challenge_salt) {
                    self.touch(index, time);
                }
            }
            Message::ConnectionDisconnect {
                client_salt,
                challenge_salt,
            } => {
                if let Some(index) = self.find_client_index(&address, client_salt, challenge_salt) {
                    self.disconnect_client(index, DisconnectReason::ClientRequested, time);
                }
            }
            Message::ConnectionPayload {
                client_salt,
                challenge_salt,
                data,
            } => {
                if let Some(client_index) =
                    self.find_client_index(&address, client_salt, challenge_salt)
                {
                    self.touch(client_index, time);
                    self.events.push(ServerEvent::Payload { client_index, data });
                }
            }
            other => {
                trace!(
                    from = %address,
                    packet = other.packet_type().name(),
                    "server ignoring client-bound packet"
                );
            }
        }
    }

    fn touch(&mut self, client_index: usize, time: f64) {
        if let Some(slot) = self.slots[client_index].as_mut() {
            slot.last_packet_receive_time = time;
        }
    }

    fn process_connection_request(&mut self, address: SocketAddr, client_salt: u64, time: f64) {
        if self.is_full() {
            debug!(from = %address, "connection request denied: server full");
            global_metrics().denial();
            self.send_to_address(
                address,
                Message::ConnectionDenied {
                    client_salt,
                    reason: DenyReason::ServerFull,
                },
            );
            return;
        }

        if self.find_existing_client_index(&address, client_salt).is_some() {
            debug!(from = %address, "connection request denied: already connected");
            global_metrics().denial();
            self.send_to_address(
                address,
                Message::ConnectionDenied {
                    client_salt,
                    reason: DenyReason::AlreadyConnected,
                },
            );
            return;
        }

        let send_rate = self.timing.challenge_send_rate;
        let Some(entry) =
            self.challenges
                .find_or_insert(address, client_salt, time, send_rate, &mut self.rng)
        else {
            debug!(from = %address, "challenge slot held by another pending client");
            return;
        };

        if entry.last_send_time + send_rate > time {
            return;
        }
        entry.last_send_time = time;
        let challenge = Message::ConnectionChallenge {
            client_salt,
            challenge_salt: entry.challenge_salt,
        };
        debug!(
            to = %address,
            challenge_salt = %format_args!("{:016x}", entry.challenge_salt),
            "sending connection challenge"
        );
        self.send_to_address(address, challenge);
    }

    fn process_connection_response(
        &mut self,
        address: SocketAddr,
        client_salt: u64,
        challenge_salt: u64,
        time: f64,
    ) {
        if let Some(index) = self.find_client_index(&address, client_salt, challenge_salt) {
            // already accepted; the keep-alive that confirmed it was probably lost
            let due = self.slots[index]
                .as_ref()
                .is_some_and(|slot| slot.last_packet_send_time + self.timing.confirm_send_rate <= time);
            if due {
                let keep_alive = Message::ConnectionKeepAlive {
                    client_salt,
                    challenge_salt,
                };
                self.send_to_client(index, keep_alive, time);
            }
            return;
        }

        let confirm_rate = self.timing.confirm_send_rate;
        let full = self.is_full();
        let Some(entry) = self.challenges.find_mut(&address, client_salt, time) else {
            trace!(from = %address, "response without a pending challenge");
            return;
        };
        if entry.challenge_salt != challenge_salt {
            debug!(from = %address, "response with wrong challenge salt");
            return;
        }

        if full {
            if entry.last_send_time + confirm_rate > time {
                return;
            }
            entry.last_send_time = time;
            global_metrics().denial();
            self.send_to_address(
                address,
                Message::ConnectionDenied {
                    client_salt,
                    reason: DenyReason::ServerFull,
                },
            );
            return;
        }

        let Some(client_index) = self.find_free_client_index() else {
            return;
        };
        self.connect_client(client_index, address, client_salt, challenge_salt, time);
    }

    fn connect_client(
        &mut self,
        client_index: usize,
        address: SocketAddr,
        client_salt: u64,
        challenge_salt: u64,
        time: f64,
    ) {
        self.slots[client_index] = Some(ClientSlot {
            address,
            client_salt,
            challenge_salt,
            connect_time: time,
            last_packet_send_time: time,
            last_packet_receive_time: time,
        });
        self.num_connected += 1;

        info!(
            client_index,
            address = %address,
            client_salt = %format_args!("{:016x}", client_salt),
            challenge_salt = %format_args!("{:016x}", challenge_salt),
            num_connected = self.num_connected,
            "client connected"
        );
        global_metrics().connection_established();
        global_metrics().handshake_success();
        self.events.push(ServerEvent::ClientConnected {
            client_index,
            address,
        });

        let keep_alive = Message::ConnectionKeepAlive {
            client_salt,
            challenge_salt,
        };
        self.send_to_client(client_index, keep_alive, time);
    }

    /// Free a slot, telling the client first.
    pub fn disconnect_client(&mut self, client_index: usize, reason: DisconnectReason, time: f64) {
        let Some(slot) = self.client(client_index).cloned() else {
            return;
        };

        let goodbye = Message::ConnectionDisconnect {
            client_salt: slot.client_salt,
            challenge_salt: slot.challenge_salt,
        };
        self.send_to_client(client_index, goodbye, time);

        self.slots[client_index] = None;
        self.num_connected -= 1;

        info!(
            client_index,
            address = %slot.address,
            reason = ?reason,
            num_connected = self.num_connected,
            "client disconnected"
        );
        global_metrics().connection_closed();
        self.events.push(ServerEvent::ClientDisconnected {
            client_index,
            address: slot.address,
            reason,
        });
    }

    /// Disconnect every client, e.g. on shutdown.
    pub fn disconnect_all(&mut self, time: f64) {
        for client_index in 0..self.slots.len() {
            self.disconnect_client(client_index, DisconnectReason::ServerRequested, time);
        }
    }

    /// Queue an application payload for a connected client.
    pub fn send_payload(&mut self, client_index: usize, data: Vec<u8>, time: f64) -> Result<()> {
        let Some(slot) = self.client(client_index) else {
            return Err(ProtocolError::NotConnected);
        };
        let message = Message::ConnectionPayload {
            client_salt: slot.client_salt,
            challenge_salt: slot.challenge_salt,
            data,
        };
        self.send_to_client(client_index, message, time);
        Ok(())
    }

    /// Queue keep-alives for every client that is due one.
    pub fn send_packets(&mut self, time: f64) {
        for client_index in 0..self.slots.len() {
            let Some(slot) = self.client(client_index) else {
                continue;
            };
            if slot.last_packet_send_time + self.timing.keep_alive_send_rate > time {
                continue;
            }
            let keep_alive = Message::ConnectionKeepAlive {
                client_salt: slot.client_salt,
                challenge_salt: slot.challenge_salt,
            };
            self.send_to_client(client_index, keep_alive, time);
        }
    }

    /// Disconnect every client that has been silent for longer than the keep-alive timeout.
    pub fn check_for_timeouts(&mut self, time: f64) {
        for client_index in 0..self.slots.len() {
            let timed_out = self.client(client_index).is_some_and(|slot| {
                slot.last_packet_receive_time + self.timing.keep_alive_timeout < time
            });
            if timed_out {
                global_metrics().timeout();
                self.disconnect_client(client_index, DisconnectReason::TimedOut, time);
            }
        }
    }

    pub fn drain_outgoing(&mut self) -> Vec<(SocketAddr, Message)> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }
}
