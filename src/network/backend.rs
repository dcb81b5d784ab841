use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::trace;

use crate::core::{Error, Result, UDP_BUFFER_SIZE};

/// UDP link to the backend
///
/// One socket, one configured peer address. Receive is timed so the loop
/// that drains it can interleave other work.
pub struct BackendLink {
    socket: UdpSocket,
    backend_addr: SocketAddr,
}

impl BackendLink {
    /// Binds the local socket and fixes the backend address
    pub async fn bind(bind_addr: SocketAddr, backend_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::config(format!("failed to bind backend socket: {e}")))?;
        Ok(BackendLink {
            socket,
            backend_addr,
        })
    }

    /// Local address the socket bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one datagram to the backend
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let sent = self
            .socket
            .send_to(data, self.backend_addr)
            .await
            .map_err(|e| Error::send(format!("udp send to {}: {e}", self.backend_addr)))?;
        if sent != data.len() {
            return Err(Error::send(format!(
                "udp short write: {sent} of {} bytes",
                data.len()
            )));
        }
        trace!(bytes = sent, to = %self.backend_addr, "backend datagram sent");
        Ok(())
    }

    /// Receives one datagram, or `None` on timeout
    pub async fn recv(&self, timeout: Duration) -> Result<Option<(SocketAddr, Vec<u8>)>> {
        let mut buf = [0u8; UDP_BUFFER_SIZE];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(Error::Io(e)),
            Ok(Ok((len, src))) => Ok(Some((src, buf[..len].to_vec()))),
        }
    }
}
