use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::options::SocketOptions;

/// A listening TCP socket with a non-blocking accept.
///
/// The listener never blocks: [`TcpServer::try_accept`] returns `Ok(None)`
/// when no connection is pending, so the owning loop can interleave
/// housekeeping and shutdown checks between attempts.
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: SocketOptions,
}

impl TcpServer {
    /// Bind and listen on `endpoint`, applying `options` before bind.
    pub fn bind(endpoint: &Endpoint, options: SocketOptions) -> Result<Self> {
        let addr = endpoint.addr();
        let bind_err = |source: std::io::Error| TransportError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket
            .set_reuse_address(options.reuse_address)
            .map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(options.listen_backlog).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Accept one pending connection, if any (never blocks).
    ///
    /// The returned stream is in blocking mode with `options` applied.
    pub fn try_accept(&self) -> Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                configure_stream(&stream, &self.options)?;
                debug!(%peer, "accepted connection");
                Ok(Some(stream))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Make one connection attempt to `endpoint` (bounded by
/// `options.connect_timeout`).
pub fn connect(endpoint: &Endpoint, options: &SocketOptions) -> Result<TcpStream> {
    let addr = endpoint.addr();
    let stream = TcpStream::connect_timeout(&addr, options.connect_timeout)
        .map_err(|source| TransportError::Connect { addr, source })?;
    configure_stream(&stream, options)?;
    debug!(%addr, "connected to tcp socket");
    Ok(stream)
}

fn configure_stream(stream: &TcpStream, options: &SocketOptions) -> Result<()> {
    // Accepted sockets inherit O_NONBLOCK from the listener on BSD-derived systems.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(options.nodelay)?;
    stream.set_write_timeout(options.write_timeout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    use super::*;

    fn loopback() -> Endpoint {
        Endpoint::resolve("127.0.0.1", 0).unwrap()
    }

    fn accept_within(server: &TcpServer, timeout: Duration) -> TcpStream {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(stream) = server.try_accept().unwrap() {
                return stream;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn bind_accept_connect() {
        let server = TcpServer::bind(&loopback(), SocketOptions::default()).unwrap();
        let target = Endpoint::from_addr(server.local_addr());
        assert_ne!(target.port(), 0);

        let handle = std::thread::spawn(move || {
            let mut client = connect(&target, &SocketOptions::default()).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut stream = accept_within(&server, Duration::from_secs(2));
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(stream.nodelay().unwrap());

        handle.join().unwrap();
    }

    #[test]
    fn try_accept_without_pending_connection_returns_none() {
        let server = TcpServer::bind(&loopback(), SocketOptions::default()).unwrap();
        assert!(server.try_accept().unwrap().is_none());
    }

    #[test]
    fn reuse_address_allows_rebinding_after_close() {
        let server = TcpServer::bind(&loopback(), SocketOptions::default()).unwrap();
        let addr = server.local_addr();
        drop(server);

        let rebound = TcpServer::bind(&Endpoint::from_addr(addr), SocketOptions::default());
        assert!(rebound.is_ok());
    }

    #[test]
    fn bind_conflict_reports_bind_error() {
        let options = SocketOptions::default().with_reuse_address(false);
        let server = TcpServer::bind(&loopback(), options).unwrap();

        let result = TcpServer::bind(&Endpoint::from_addr(server.local_addr()), options);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn connect_to_closed_port_is_transient() {
        let server = TcpServer::bind(&loopback(), SocketOptions::default()).unwrap();
        let target = Endpoint::from_addr(server.local_addr());
        drop(server);

        let err = connect(&target, &SocketOptions::default()).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn nodelay_option_is_applied() {
        let server = TcpServer::bind(&loopback(), SocketOptions::default()).unwrap();
        let target = Endpoint::from_addr(server.local_addr());
        let options = SocketOptions::default().with_nodelay(false);

        let client = connect(&target, &options).unwrap();
        assert!(!client.nodelay().unwrap());
        let _accepted = accept_within(&server, Duration::from_secs(2));
    }
}
