//! Socket transport layer for datasocket.
//!
//! Provides the pieces every higher layer needs to open a connection:
//! - [`Endpoint`] resolves a `(host, port)` pair once, at construction time
//! - [`SocketOptions`] carries no-delay, reuse-address and timeout settings
//! - [`TcpServer`] / [`connect`] for stream sockets
//! - [`DatagramSocket`] for UDP
//!
//! This is the lowest layer of datasocket. Framing, payload formats and
//! connection lifecycle all build on the std socket types produced here.

pub mod endpoint;
pub mod error;
pub mod options;
pub mod tcp;
pub mod udp;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use options::SocketOptions;
pub use tcp::{connect, TcpServer};
pub use udp::DatagramSocket;
