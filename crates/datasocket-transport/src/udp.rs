use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::options::SocketOptions;

/// A UDP socket, either bound to a receive endpoint or to an ephemeral
/// local port for sending.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl DatagramSocket {
    /// Bind to `endpoint` to receive datagrams from any sender.
    pub fn bind(endpoint: &Endpoint, options: SocketOptions) -> Result<Self> {
        let socket = Self::bind_addr(endpoint.addr(), &options)?;
        info!(local_addr = %socket.local_addr, "bound udp socket");
        Ok(socket)
    }

    /// Bind an ephemeral local port suitable for sending to `destination`.
    pub fn for_destination(destination: &Endpoint, options: SocketOptions) -> Result<Self> {
        let socket = Self::bind_addr(destination.unspecified_local(), &options)?;
        debug!(local_addr = %socket.local_addr, %destination, "opened udp sender");
        Ok(socket)
    }

    fn bind_addr(addr: SocketAddr, options: &SocketOptions) -> Result<Self> {
        let bind_err = |source: std::io::Error| TransportError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        socket
            .set_reuse_address(options.reuse_address)
            .map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok(Self { socket, local_addr })
    }

    /// Send one datagram to `target`.
    pub fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(datagram, target)?)
    }

    /// Receive one datagram. Datagrams longer than `buf` are truncated by the OS.
    pub fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Bound the time a `recv_from` may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
