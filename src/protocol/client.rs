//! Client side of the connection handshake.
//!
//! ```text
//! Disconnected -> SendingConnectionRequest -> SendingChallengeResponse -> Connected
//!                        |                            |                       |
//!                        +-> ConnectionRequestTimedOut +-> ChallengeResponseTimedOut
//!                        +-> ConnectionDeniedFull                             +-> KeepAliveTimedOut
//!                        +-> ConnectionDeniedAlreadyConnected
//! ```
//!
//! The client is a pure state machine: callers pass the current time into every call and
//! collect outgoing messages with [`Client::drain_outgoing`].

use crate::config::{ClientConfig, ClientTiming};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{generate_salt, seeded_rng};
use crate::protocol::message::{DenyReason, Message};
use crate::utils::metrics::global_metrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, info, trace};

/// Timestamp used for "never happened".
const NEVER: f64 = -1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Disconnected,
    SendingConnectionRequest,
    SendingChallengeResponse,
    Connected,
    ConnectionRequestTimedOut,
    ChallengeResponseTimedOut,
    KeepAliveTimedOut,
    ConnectionDeniedFull,
    ConnectionDeniedAlreadyConnected,
}

impl ClientState {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::SendingConnectionRequest | Self::SendingChallengeResponse
        )
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Terminal failure states; only a new `connect` leaves them.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Self::ConnectionRequestTimedOut
                | Self::ChallengeResponseTimedOut
                | Self::KeepAliveTimedOut
                | Self::ConnectionDeniedFull
                | Self::ConnectionDeniedAlreadyConnected
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::SendingConnectionRequest => "sending connection request",
            Self::SendingChallengeResponse => "sending challenge response",
            Self::Connected => "connected",
            Self::ConnectionRequestTimedOut => "connection request timed out",
            Self::ChallengeResponseTimedOut => "challenge response timed out",
            Self::KeepAliveTimedOut => "keep-alive timed out",
            Self::ConnectionDeniedFull => "connection denied: server full",
            Self::ConnectionDeniedAlreadyConnected => "connection denied: already connected",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged { from: ClientState, to: ClientState },
    Payload(Vec<u8>),
}

#[derive(Debug)]
pub struct Client {
    timing: ClientTiming,
    state: ClientState,
    server_address: Option<SocketAddr>,
    client_salt: u64,
    challenge_salt: u64,
    last_packet_send_time: f64,
    last_packet_receive_time: f64,
    client_salt_expiry_time: f64,
    rng: StdRng,
    outgoing: Vec<(SocketAddr, Message)>,
    events: Vec<ClientEvent>,
}

impl Client {
    /// Create a client whose salts are drawn from a generator seeded with `seed`.
    pub fn new(timing: ClientTiming, seed: u64) -> Self {
        Self::with_rng(timing, StdRng::seed_from_u64(seed))
    }

    /// Create a client seeded from the operating system.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::with_rng(config.timing(), seeded_rng()?))
    }

    fn with_rng(timing: ClientTiming, rng: StdRng) -> Self {
        Self {
            timing,
            state: ClientState::Disconnected,
            server_address: None,
            client_salt: 0,
            challenge_salt: 0,
            last_packet_send_time: NEVER,
            last_packet_receive_time: NEVER,
            client_salt_expiry_time: NEVER,
            rng,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn connection_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    pub fn client_salt(&self) -> u64 {
        self.client_salt
    }

    pub fn challenge_salt(&self) -> u64 {
        self.challenge_salt
    }

    pub fn last_packet_receive_time(&self) -> f64 {
        self.last_packet_receive_time
    }

    pub fn timing(&self) -> &ClientTiming {
        &self.timing
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "client state changed");
        self.events.push(ClientEvent::StateChanged {
            from: self.state,
            to: state,
        });
        self.state = state;
    }

    fn send_to_server(&mut self, message: Message, time: f64) {
        if let Some(address) = self.server_address {
            trace!(to = %address, packet = message.packet_type().name(), "client queued packet");
            self.outgoing.push((address, message));
            self.last_packet_send_time = time;
        }
    }

    // Session fields only; the state is left to the caller.
    fn reset_connection_data(&mut self) {
        self.server_address = None;
        self.client_salt = 0;
        self.challenge_salt = 0;
        self.last_packet_send_time = NEVER;
        self.last_packet_receive_time = NEVER;
        self.client_salt_expiry_time = NEVER;
    }

    /// Start connecting to `address`, abandoning any current session.
    pub fn connect(&mut self, address: SocketAddr, time: f64) {
        self.disconnect(time);

        self.server_address = Some(address);
        self.client_salt = generate_salt(&mut self.rng);
        self.challenge_salt = 0;
        // first request goes out on the next send
        self.last_packet_send_time = NEVER;
        self.last_packet_receive_time = time;
        self.client_salt_expiry_time = time + self.timing.client_salt_timeout;

        info!(
            server = %address,
            client_salt = %format_args!("{:016x}", self.client_salt),
            "client connecting"
        );
        global_metrics().handshake_attempt();
        self.set_state(ClientState::SendingConnectionRequest);
    }

    /// Leave the current session. A connected client tells the server first.
    pub fn disconnect(&mut self, time: f64) {
        if self.state == ClientState::Connected {
            info!(
                client_salt = %format_args!("{:016x}", self.client_salt),
                challenge_salt = %format_args!("{:016x}", self.challenge_salt),
                "client-side disconnect"
            );
            let message = Message::ConnectionDisconnect {
                client_salt: self.client_salt,
                challenge_salt: self.challenge_salt,
            };
            self.send_to_server(message, time);
            global_metrics().connection_closed();
        }
        self.reset_connection_data();
        self.set_state(ClientState::Disconnected);
    }

    /// Queue whatever the current state owes the server.
    pub fn send_packets(&mut self, time: f64) {
        let (rate, message) = match self.state {
            ClientState::SendingConnectionRequest => (
                self.timing.request_send_rate,
                Message::ConnectionRequest {
                    client_salt: self.client_salt,
                },
            ),
            ClientState::SendingChallengeResponse => (
                self.timing.response_send_rate,
                Message::ConnectionResponse {
                    client_salt: self.client_salt,
                    challenge_salt: self.challenge_salt,
                },
            ),
            ClientState::Connected => (
                self.timing.keep_alive_send_rate,
                Message::ConnectionKeepAlive {
                    client_salt: self.client_salt,
                    challenge_salt: self.challenge_salt,
                },
            ),
            _ => return,
        };

        if self.last_packet_send_time + rate <= time {
            self.send_to_server(message, time);
        }
    }

    /// Queue an application payload. Only valid while connected.
    pub fn send_payload(&mut self, data: Vec<u8>, time: f64) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let message = Message::ConnectionPayload {
            client_salt: self.client_salt,
            challenge_salt: self.challenge_salt,
            data,
        };
        self.send_to_server(message, time);
        Ok(())
    }

    /// Apply timeouts and roll an unconfirmed client salt.
    pub fn check_for_timeout(&mut self, time: f64) {
        match self.state {
            ClientState::SendingConnectionRequest => {
                if self.last_packet_receive_time + self.timing.connection_request_timeout < time {
                    info!("connection request to server timed out");
                    global_metrics().timeout();
                    global_metrics().handshake_failed();
                    self.set_state(ClientState::ConnectionRequestTimedOut);
                    return;
                }
                if self.client_salt_expiry_time < time {
                    self.client_salt = generate_salt(&mut self.rng);
                    self.client_salt_expiry_time = time + self.timing.client_salt_timeout;
                    debug!(
                        client_salt = %format_args!("{:016x}", self.client_salt),
                        "client salt expired, rolled a new one"
                    );
                }
            }
            ClientState::SendingChallengeResponse => {
                if self.last_packet_receive_time + self.timing.challenge_response_timeout < time {
                    info!("challenge response to server timed out");
                    global_metrics().timeout();
                    global_metrics().handshake_failed();
                    self.set_state(ClientState::ChallengeResponseTimedOut);
                }
            }
            ClientState::Connected => {
                if self.last_packet_receive_time + self.timing.keep_alive_timeout < time {
                    info!("keep-alive timed out");
                    global_metrics().timeout();
                    global_metrics().connection_closed();
                    // no courtesy disconnect: the server has gone quiet
                    self.reset_connection_data();
                    self.set_state(ClientState::KeepAliveTimedOut);
                }
            }
            _ => {}
        }
    }

    fn from_server(&self, address: &SocketAddr) -> bool {
        self.server_address.as_ref() == Some(address)
    }

    fn salts_match(&self, client_salt: u64, challenge_salt: u64) -> bool {
        client_salt == self.client_salt && challenge_salt == self.challenge_salt
    }

    /// Handle one message received from `address`.
    pub fn process_message(&mut self, address: SocketAddr, message: Message, time: f64) {
        if !self.from_server(&address) {
            trace!(from = %address, "ignoring packet from unknown address");
            return;
        }

        match message {
            Message::ConnectionDenied {
                client_salt,
                reason,
            } => {
                if self.state != ClientState::SendingConnectionRequest
                    || client_salt != self.client_salt
                {
                    return;
                }
                info!(server = %address, reason = ?reason, "connection denied");
                global_metrics().denial();
                global_metrics().handshake_failed();
                self.set_state(match reason {
                    DenyReason::ServerFull => ClientState::ConnectionDeniedFull,
                    DenyReason::AlreadyConnected => ClientState::ConnectionDeniedAlreadyConnected,
                });
            }
            Message::ConnectionChallenge {
                client_salt,
                challenge_salt,
            } => {
                if self.state != ClientState::SendingConnectionRequest
                    || client_salt != self.client_salt
                {
                    return;
                }
                debug!(
                    server = %address,
                    challenge_salt = %format_args!("{:016x}", challenge_salt),
                    "received connection challenge"
                );
                self.challenge_salt = challenge_salt;
                self.last_packet_receive_time = time;
                // answer on the next send without waiting out the rate
                self.last_packet_send_time = NEVER;
                self.set_state(ClientState::SendingChallengeResponse);
            }
            Message::ConnectionKeepAlive {
                client_salt,
                challenge_salt,
            } => {
                if !matches!(
                    self.state,
                    ClientState::SendingChallengeResponse | ClientState::Connected
                ) || !self.salts_match(client_salt, challenge_salt)
                {
                    return;
                }
                if self.state == ClientState::SendingChallengeResponse {
                    info!(server = %address, "client is now connected");
                    global_metrics().handshake_success();
                    global_metrics().connection_established();
                    self.set_state(ClientState::Connected);
                }
                self.last_packet_receive_time = time;
            }
            Message::ConnectionDisconnect {
                client_salt,
                challenge_salt,
            } => {
                if self.state != ClientState::Connected
                    || !self.salts_match(client_salt, challenge_salt)
                {
                    return;
                }
                info!(server = %address, "server closed the connection");
                global_metrics().connection_closed();
                self.reset_connection_data();
                self.set_state(ClientState::Disconnected);
            }
            Message::ConnectionPayload {
                client_salt,
                challenge_salt,
                data,
            } => {
                if self.state != ClientState::Connected
                    || !self.salts_match(client_salt, challenge_salt)
                {
                    return;
                }
                self.last_packet_receive_time = time;
                self.events.push(ClientEvent::Payload(data));
            }
            other => {
                trace!(packet = other.packet_type().name(), "client ignoring server-bound packet");
            }
        }
    }

    /// Take every queued outgoing message.
    pub fn drain_outgoing(&mut self) -> Vec<(SocketAddr, Message)> {
        std::mem::take(&mut self.outgoing)
    }

    /// Take every pending event.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }
}
