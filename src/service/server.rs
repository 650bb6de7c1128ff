use crate::config::{NetworkConfig, TransportConfig};
use crate::error::Result;
use crate::protocol::dispatcher::{record_decode_error, Dispatcher, Inbound, PeerChannel};
use crate::protocol::server::{DisconnectReason, Server, ServerEvent};
use crate::service::{parse_socket_address, send_datagram};
use crate::transport::udp::UdpTransport;
use crate::transport::DatagramSocket;
use crate::utils::logging::init_logging;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::time::Clock;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Requests from the application to a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Send { client_index: usize, data: Vec<u8> },
    Disconnect { client_index: usize },
}

type SessionKey = (SocketAddr, u64, u64);

// Reassembly and sequence state for one client slot, tagged with the session that owns it.
#[derive(Debug, Default)]
struct SlotChannel {
    owner: Option<SessionKey>,
    channel: PeerChannel,
}

/// Index of the slot channel for `address`, reset if the slot changed hands since last use.
///
/// Routes to the newest slot for the address, so a reconnect starts from fresh sequences
/// even while the stale slot waits out its timeout.
fn slot_channel(server: &Server, channels: &mut [SlotChannel], address: &SocketAddr) -> Option<usize> {
    let index = server.find_client_by_address(address)?;
    let slot = server.client(index)?;
    let key = (slot.address, slot.client_salt, slot.challenge_salt);
    let entry = channels.get_mut(index)?;
    if entry.owner != Some(key) {
        entry.channel.reset();
        entry.owner = Some(key);
    }
    Some(index)
}

/// A [`Server`] bound to a socket.
///
/// Each client slot has its own [`PeerChannel`]. Handshake traffic to addresses without a
/// slot never needs fragmenting and goes through a shared spare channel; fragments from such
/// addresses are dropped.
#[derive(Debug)]
pub struct ServerEndpoint<S> {
    socket: S,
    dispatcher: Dispatcher,
    server: Server,
    channels: Vec<SlotChannel>,
    spare: PeerChannel,
    recv_buf: BytesMut,
}

impl<S: DatagramSocket> ServerEndpoint<S> {
    pub fn new(socket: S, server: Server, transport: &TransportConfig) -> Self {
        let channels = (0..server.max_clients()).map(|_| SlotChannel::default()).collect();
        Self {
            socket,
            dispatcher: Dispatcher::new(transport.protocol_id),
            server,
            channels,
            spare: PeerChannel::new(),
            recv_buf: BytesMut::zeroed(transport.max_datagram_size),
        }
    }

    pub fn from_config(socket: S, config: &NetworkConfig) -> Result<Self> {
        let server = Server::from_config(&config.server)?;
        Ok(Self::new(socket, server, &config.transport))
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send an application payload to a connected client, fragmenting it if needed.
    pub fn send_payload(&mut self, client_index: usize, data: Vec<u8>, time: f64) -> Result<()> {
        self.server.send_payload(client_index, data, time)?;
        self.flush()
    }

    pub fn disconnect_client(&mut self, client_index: usize, time: f64) -> Result<()> {
        self.server
            .disconnect_client(client_index, DisconnectReason::ServerRequested, time);
        self.flush()
    }

    /// Disconnect everyone and return the resulting events.
    pub fn disconnect_all(&mut self, time: f64) -> Result<Vec<ServerEvent>> {
        self.server.disconnect_all(time);
        self.flush()?;
        Ok(self.server.drain_events())
    }

    /// Receive, time out, send keep-alives, flush. Returns the events raised along the way.
    pub fn tick(&mut self, time: f64) -> Result<Vec<ServerEvent>> {
        let _timer = Timer::start("server_tick");
        self.receive_packets(time)?;
        self.server.check_for_timeouts(time);
        self.server.send_packets(time);
        self.flush()?;
        Ok(self.server.drain_events())
    }

    fn receive_packets(&mut self, time: f64) -> Result<()> {
        while let Some((len, from)) = self.socket.receive_datagram(&mut self.recv_buf)? {
            global_metrics().datagram_received(len as u64);
            let inbound = match self.dispatcher.decode(&self.recv_buf[..len]) {
                Ok(inbound) => inbound,
                Err(e) => {
                    record_decode_error(&e);
                    debug!(from = %from, bytes = len, error = %e, "dropping datagram");
                    continue;
                }
            };

            match inbound {
                Inbound::Message(message) => self.server.process_message(from, message, time),
                Inbound::Fragment { header, data } => {
                    let Some(index) = slot_channel(&self.server, &mut self.channels, &from) else {
                        trace!(from = %from, "fragment from unconnected address");
                        continue;
                    };
                    let channel = &mut self.channels[index].channel;
                    match self.dispatcher.reassemble(channel, header, &data) {
                        Ok(messages) => {
                            for message in messages {
                                self.server.process_message(from, message, time);
                            }
                        }
                        Err(e) => debug!(from = %from, client_index = index, error = %e, "fragment rejected"),
                    }
                }
            }
        }
        Ok(())
    }

    // Every queued message is attempted; the first encode failure is returned.
    fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (to, message) in self.server.drain_outgoing() {
            let channel = match slot_channel(&self.server, &mut self.channels, &to) {
                Some(index) => &mut self.channels[index].channel,
                None => &mut self.spare,
            };
            match self.dispatcher.encode(channel, message) {
                Ok(datagrams) => {
                    for datagram in &datagrams {
                        send_datagram(&mut self.socket, to, datagram);
                    }
                }
                Err(e) => {
                    warn!(to = %to, error = %e, "failed to encode message");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }
}

async fn forward(events: &mpsc::Sender<ServerEvent>, batch: Vec<ServerEvent>) {
    for event in batch {
        if events.send(event).await.is_err() {
            trace!("server event receiver dropped");
        }
    }
}

/// Serve on `config.server.address` until `shutdown` is cancelled.
///
/// Commands are applied as they arrive; events are forwarded to `events`. On shutdown every
/// client is sent a disconnect before the socket is closed. Logging is installed from
/// `config.logging` unless a subscriber is already set.
#[instrument(skip_all, fields(address = %config.server.address))]
pub async fn run_server(
    config: NetworkConfig,
    mut commands: mpsc::Receiver<ServerCommand>,
    events: mpsc::Sender<ServerEvent>,
    shutdown: CancellationToken,
) -> Result<()> {
    init_logging(&config.logging);
    config.validate_strict()?;
    let address = parse_socket_address("server", &config.server.address)?;

    let socket = UdpTransport::bind(address).await?;
    let mut endpoint = ServerEndpoint::from_config(socket, &config)?;
    let clock = Clock::new();
    let mut interval = tokio::time::interval(config.server.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut commands_open = true;

    info!(
        local = %endpoint.local_addr()?,
        max_clients = endpoint.server().max_clients(),
        "server listening"
    );

    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(num_connected = endpoint.server().num_connected(), "server shutting down");
                let batch = endpoint.disconnect_all(clock.now())?;
                forward(&events, batch).await;
                break;
            }
            command = commands.recv(), if commands_open => {
                let Some(command) = command else {
                    commands_open = false;
                    continue;
                };
                let time = clock.now();
                let applied = match command {
                    ServerCommand::Send { client_index, data } => {
                        endpoint.send_payload(client_index, data, time)
                    }
                    ServerCommand::Disconnect { client_index } => {
                        endpoint.disconnect_client(client_index, time)
                    }
                };
                if let Err(e) = applied {
                    debug!(error = %e, "server command failed");
                }
                endpoint.tick(time)?
            }
            ready = endpoint.socket().readable() => {
                ready?;
                endpoint.tick(clock.now())?
            }
            _ = interval.tick() => endpoint.tick(clock.now())?,
        };
        forward(&events, batch).await;
    }

    global_metrics().log_metrics();
    Ok(())
}
