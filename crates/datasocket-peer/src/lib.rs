//! Send and receive sockets for datasocket.
//!
//! This is the "just works" layer. A [`SendSocket`] publishes the latest
//! value to every connected receiver; a [`ReceiveSocket`] keeps the latest
//! value it was sent and optionally hands each one to a callback.
//!
//! Both sides run their I/O on background threads. Publishing never blocks
//! on the network, and values that arrive faster than they can be handled
//! replace each other instead of queueing.

/// Connection status event: `INFO` when the socket is verbose, `DEBUG` otherwise.
macro_rules! status {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::info!($($arg)+);
        } else {
            ::tracing::debug!($($arg)+);
        }
    };
}
pub(crate) use status;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
mod inbound;
pub mod manager;
mod outbound;
pub mod receiver;
pub mod sender;
pub mod shutdown;
pub mod slot;
mod worker;

pub use config::{RawFraming, Role, SocketConfig, SocketConfigBuilder, Transport};
pub use dispatch::Handler;
pub use error::{PeerError, Result};
pub use handshake::{receive_format, send_format, FormatNegotiator};
pub use manager::{Closer, ConnectionManager, Delivery, PeerConnection, PeerStream, Wire};
pub use receiver::ReceiveSocket;
pub use sender::SendSocket;
pub use shutdown::{Flag, Shutdown};
pub use slot::LatestValue;
