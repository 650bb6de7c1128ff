use crate::config::{NetworkConfig, TransportConfig};
use crate::error::Result;
use crate::protocol::client::{Client, ClientEvent, ClientState};
use crate::protocol::dispatcher::{record_decode_error, Dispatcher, Inbound, PeerChannel};
use crate::service::{parse_socket_address, send_datagram};
use crate::transport::udp::UdpTransport;
use crate::transport::DatagramSocket;
use crate::utils::logging::init_logging;
use crate::utils::metrics::global_metrics;
use crate::utils::time::Clock;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// A [`Client`] bound to a socket.
#[derive(Debug)]
pub struct ClientEndpoint<S> {
    socket: S,
    dispatcher: Dispatcher,
    channel: PeerChannel,
    client: Client,
    recv_buf: BytesMut,
}

impl<S: DatagramSocket> ClientEndpoint<S> {
    pub fn new(socket: S, client: Client, transport: &TransportConfig) -> Self {
        Self {
            socket,
            dispatcher: Dispatcher::new(transport.protocol_id),
            channel: PeerChannel::new(),
            client,
            recv_buf: BytesMut::zeroed(transport.max_datagram_size),
        }
    }

    /// Build from configuration with salts seeded from the operating system.
    pub fn from_config(socket: S, config: &NetworkConfig) -> Result<Self> {
        let client = Client::from_config(&config.client)?;
        Ok(Self::new(socket, client, &config.transport))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn state(&self) -> ClientState {
        self.client.state()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start connecting to `address`. Reassembly state from any earlier session is dropped.
    pub fn connect(&mut self, address: SocketAddr, time: f64) -> Result<()> {
        self.client.connect(address, time);
        self.channel.reset();
        self.flush()
    }

    pub fn disconnect(&mut self, time: f64) -> Result<()> {
        self.client.disconnect(time);
        self.flush()
    }

    /// Send an application payload to the server, fragmenting it if needed.
    pub fn send_payload(&mut self, data: Vec<u8>, time: f64) -> Result<()> {
        self.client.send_payload(data, time)?;
        self.flush()
    }

    /// Receive, time out, resend, flush. Returns the events raised along the way.
    pub fn tick(&mut self, time: f64) -> Result<Vec<ClientEvent>> {
        self.receive_packets(time)?;
        self.client.check_for_timeout(time);
        self.client.send_packets(time);
        self.flush()?;
        Ok(self.client.drain_events())
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
                Inbound::Message(message) => self.client.process_message(from, message, time),
                Inbound::Fragment { header, data } => {
                    if self.client.server_address() != Some(from) {
                        trace!(from = %from, "fragment from unknown address");
                        continue;
                    }
                    match self.dispatcher.reassemble(&mut self.channel, header, &data) {
                        Ok(messages) => {
                            for message in messages {
                                self.client.process_message(from, message, time);
                            }
                        }
                        Err(e) => debug!(from = %from, error = %e, "fragment rejected"),
                    }
                }
            }
        }
        Ok(())
    }

    // Every queued message is attempted; the first encode failure is returned.
    fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (to, message) in self.client.drain_outgoing() {
            match self.dispatcher.encode(&mut self.channel, message) {
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

/// Connect to `config.client.server_address` and run until cancelled or the connection fails.
///
/// Payloads received on `outbound` are sent once connected. Events are forwarded to `events`;
/// a dropped receiver is tolerated. A payload that cannot be sent is logged and dropped.
/// Logging is installed from `config.logging` unless a subscriber is already set.
/// Returns the final client state.
#[instrument(skip_all, fields(server = %config.client.server_address))]
pub async fn run_client(
    config: NetworkConfig,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<ClientEvent>,
    shutdown: CancellationToken,
) -> Result<ClientState> {
    init_logging(&config.logging);
    config.validate_strict()?;
    let local = parse_socket_address("client", &config.client.address)?;
    let server = parse_socket_address("server", &config.client.server_address)?;

    let socket = UdpTransport::bind(local).await?;
    let mut endpoint = ClientEndpoint::from_config(socket, &config)?;
    let clock = Clock::new();
    let mut interval = tokio::time::interval(config.client.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut outbound_open = true;

    endpoint.connect(server, clock.now())?;

    let state = loop {
        let tick_events = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("client shutting down");
                endpoint.disconnect(clock.now())?;
                break endpoint.state();
            }
            payload = outbound.recv(), if outbound_open => {
                match payload {
                    Some(data) if endpoint.state().is_connected() => {
                        let bytes = data.len();
                        if let Err(e) = endpoint.send_payload(data, clock.now()) {
                            warn!(bytes, error = %e, "payload dropped");
                        }
                    }
                    Some(data) => {
                        debug!(bytes = data.len(), state = %endpoint.state(), "not connected, payload dropped");
                    }
                    None => outbound_open = false,
                }
                continue;
            }
            ready = endpoint.socket().readable() => {
                ready?;
                endpoint.tick(clock.now())?
            }
            _ = interval.tick() => endpoint.tick(clock.now())?,
        };

        for event in tick_events {
            if events.send(event).await.is_err() {
                trace!("client event receiver dropped");
            }
        }

        let state = endpoint.state();
        if state.is_failed() || state == ClientState::Disconnected {
            info!(state = %state, "client stopped");
            break state;
        }
    };

    global_metrics().log_metrics();
    Ok(state)
}
