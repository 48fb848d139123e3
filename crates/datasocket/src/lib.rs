//! Latest-value data exchange over TCP and UDP sockets.
//!
//! A sender publishes values; every connected receiver ends up holding the
//! most recent one. Values carry one of four payload formats (numeric
//! arrays, JSON, zip containers, raw bytes), announced once per connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: address resolution, socket options, TCP/UDP setup
//! - [`frame`]: length-prefixed framing, unframed RAW reads, datagram pairs
//! - [`payload`]: format tags and payload codecs
//! - [`peer`]: send/receive sockets, handshake and broadcast
//! - `logging`: subscriber setup for programs (requires `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use datasocket_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use datasocket_frame::*;
}

/// Re-export payload types.
pub mod payload {
    pub use datasocket_payload::*;
}

/// Re-export peer types.
pub mod peer {
    pub use datasocket_peer::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use datasocket_payload::{Format, Payload};
pub use datasocket_peer::{
    PeerError, RawFraming, ReceiveSocket, Role, SendSocket, SocketConfig, Transport,
};
