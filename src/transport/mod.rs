//! # Transport Layer
//!
//! Non-blocking datagram sockets.
//!
//! The protocol core never touches a socket directly. Endpoints drive any
//! [`DatagramSocket`]: send a datagram, or poll for one without blocking.
//!
//! ## Implementations
//! - **UDP**: [`udp::UdpTransport`], a tokio UDP socket driven with `try_send_to` / `try_recv_from`
//! - **Local**: [`local::LocalSocket`], an in-memory network for tests and simulations

pub mod local;
pub mod udp;

use crate::error::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A datagram socket that never blocks.
pub trait DatagramSocket {
    /// Send one datagram to `to`.
    fn send_datagram(&mut self, to: SocketAddr, data: &[u8]) -> Result<()>;

    /// Receive one pending datagram into `buf`.
    ///
    /// Returns `Ok(None)` when nothing is waiting.
    fn receive_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Build an IPv4 socket address from its octets and port.
pub fn parse_address(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
}

/// Canonical text form of an address, e.g. `127.0.0.1:50000`.
pub fn format_address(address: &SocketAddr) -> String {
    address.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_helpers() {
        let address = parse_address(127, 0, 0, 1, 50000);
        assert_eq!(format_address(&address), "127.0.0.1:50000");
        assert_eq!(address.port(), 50000);
    }
}
