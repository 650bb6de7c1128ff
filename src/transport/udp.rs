use crate::error::{constants, ProtocolError, Result};
use crate::transport::DatagramSocket;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument};

/// UDP transport over a tokio socket.
///
/// Sends and receives use the `try_*` variants, so the endpoint tick loop polls it exactly
/// like a non-blocking OS socket. The async runner awaits readiness between ticks.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to `address`. Port 0 picks an ephemeral port.
    #[instrument(fields(address = %address))]
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(address).await.map_err(|e| {
            ProtocolError::TransportError(format!("{} {address}: {e}", constants::ERR_SOCKET_BIND))
        })?;
        info!(local = ?socket.local_addr().ok(), "UDP socket bound");
        Ok(Self { socket })
    }

    /// Wait until a datagram can be read.
    pub async fn readable(&self) -> Result<()> {
        self.socket.readable().await?;
        Ok(())
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

// ICMP port unreachable from an earlier send surfaces as a reset on some platforms. It says
// nothing about the queue, so keep reading.
fn receive_skipping_resets<F>(mut recv: F) -> Result<Option<(usize, SocketAddr)>>
where
    F: FnMut() -> io::Result<(usize, SocketAddr)>,
{
    loop {
        match recv() {
            Ok((len, from)) => return Ok(Some((len, from))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                debug!(error = %e, "ignoring connection reset on UDP socket");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

impl DatagramSocket for UdpTransport {
    fn send_datagram(&mut self, to: SocketAddr, data: &[u8]) -> Result<()> {
        match self.socket.try_send_to(data, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // send buffer full; the datagram is lost like any other UDP drop
                debug!(to = %to, bytes = data.len(), "send would block, dropping datagram");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let socket = &self.socket;
        receive_skipping_resets(|| socket.try_recv_from(buf))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
