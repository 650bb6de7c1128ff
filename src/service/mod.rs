//! # Endpoints
//!
//! Glue between a [`DatagramSocket`] and the protocol state machines.
//!
//! An endpoint owns its socket, a [`Dispatcher`](crate::protocol::Dispatcher) and the
//! reassembly state for each peer. Calling `tick(time)` drains the socket, dispatches what
//! arrived, runs the timeout and resend logic, and flushes everything the state machine
//! queued. The async runners drive `tick` from a tokio interval until cancelled.

pub mod client;
pub mod server;

pub use client::{run_client, ClientEndpoint};
pub use server::{run_server, ServerCommand, ServerEndpoint};

use crate::error::{ProtocolError, Result};
use crate::transport::DatagramSocket;
use crate::utils::metrics::global_metrics;
use std::net::SocketAddr;
use tracing::warn;

/// Send one datagram; a socket error is logged and the datagram counted as lost.
fn send_datagram<S: DatagramSocket>(socket: &mut S, to: SocketAddr, datagram: &[u8]) {
    match socket.send_datagram(to, datagram) {
        Ok(()) => global_metrics().datagram_sent(datagram.len() as u64),
        Err(e) => warn!(to = %to, bytes = datagram.len(), error = %e, "failed to send datagram"),
    }
}

fn parse_socket_address(label: &str, address: &str) -> Result<SocketAddr> {
    address.parse().map_err(|e| {
        ProtocolError::ConfigError(format!("Invalid {label} address '{address}': {e}"))
    })
}
