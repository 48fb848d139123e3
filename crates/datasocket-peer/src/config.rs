use std::fmt;
use std::time::Duration;

use datasocket_frame::{DEFAULT_MAX_PAYLOAD, DEFAULT_WINDOW_CAPACITY};
use datasocket_payload::Format;
use datasocket_transport::{Endpoint, SocketOptions};

use crate::error::{PeerError, Result};

/// Which side opens the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Bind, listen and accept.
    #[default]
    Server,
    /// Connect, retrying until the server is reachable.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Server => "server",
            Role::Client => "client",
        })
    }
}

/// Socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Stream socket with handshake and length-prefixed frames.
    #[default]
    Tcp,
    /// Datagram pairs to/from a fixed endpoint. Role is ignored: senders
    /// target `(host, port)`, receivers bind it.
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        })
    }
}

/// How RAW payloads are delimited on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawFraming {
    /// No prefix. The receiver treats "socket drained" as end of message.
    #[default]
    Unframed,
    /// Standard 4-byte length prefix, still without a handshake.
    LengthPrefixed,
}

/// Configuration shared by [`SendSocket`](crate::SendSocket) and
/// [`ReceiveSocket`](crate::ReceiveSocket).
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Server (bind/accept) or client (connect/retry). Default: server.
    pub role: Role,
    /// TCP or UDP. Default: TCP.
    pub transport: Transport,
    /// Host to bind or connect to. Empty means all interfaces. Default: `localhost`.
    pub host: String,
    /// Port to bind or connect to. `0` binds an ephemeral port.
    pub port: u16,
    /// Payload format. Required for senders; receivers adopt the first
    /// handshake when unset (TCP only).
    pub format: Option<Format>,
    /// Report connection status at `INFO` instead of `DEBUG`.
    pub verbose: bool,
    /// Leave background threads running when the socket is dropped.
    pub daemon: bool,
    /// Read window for unframed RAW streams. Default: 64 KiB.
    pub receive_buffer_size: usize,
    /// RAW stream delimiting. Default: unframed.
    pub raw_framing: RawFraming,
    /// Embed a delivery timestamp in every sent payload.
    pub include_timestamp: bool,
    /// Socket-level options applied at bind/connect.
    pub socket_options: SocketOptions,
    /// Pause between connect attempts. Default: 1 ms.
    pub retry_delay: Duration,
    /// How long `stop` waits for each background thread. Default: 2 s.
    pub join_timeout: Duration,
    /// Largest payload accepted or sent. Default: 64 MiB.
    pub max_payload_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            transport: Transport::default(),
            host: "localhost".to_string(),
            port: 0,
            format: None,
            verbose: false,
            daemon: false,
            receive_buffer_size: DEFAULT_WINDOW_CAPACITY,
            raw_framing: RawFraming::default(),
            include_timestamp: false,
            socket_options: SocketOptions::default(),
            retry_delay: Duration::from_millis(1),
            join_timeout: Duration::from_secs(2),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl SocketConfig {
    pub fn builder() -> SocketConfigBuilder {
        SocketConfigBuilder::default()
    }

    /// Check settings that do not depend on the socket direction.
    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size == 0 {
            return Err(PeerError::Config(
                "receive_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(PeerError::Config(
                "max_payload_size must be greater than zero".to_string(),
            ));
        }
        if self.join_timeout.is_zero() {
            return Err(PeerError::Config(
                "join_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve `host:port` once.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint::resolve(&self.host, self.port)?)
    }

    /// True when the stream carries RAW bytes without any prefix.
    pub(crate) fn is_unframed_raw(&self) -> bool {
        self.transport == Transport::Tcp
            && self.format == Some(Format::Raw)
            && self.raw_framing == RawFraming::Unframed
    }

    /// Format tag written on every new stream, if any.
    pub(crate) fn handshake_format(&self) -> Option<Format> {
        match (self.transport, self.format) {
            (Transport::Tcp, Some(format)) if !format.is_raw() => Some(format),
            _ => None,
        }
    }

    pub(crate) fn frame_config(&self) -> datasocket_frame::FrameConfig {
        datasocket_frame::FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

/// Consuming builder for [`SocketConfig`].
#[derive(Debug, Clone, Default)]
pub struct SocketConfigBuilder {
    config: SocketConfig,
}

impl SocketConfigBuilder {
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.config.format = Some(format);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.config.daemon = daemon;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    pub fn raw_framing(mut self, framing: RawFraming) -> Self {
        self.config.raw_framing = framing;
        self
    }

    pub fn include_timestamp(mut self, include: bool) -> Self {
        self.config.include_timestamp = include;
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.config.socket_options = options;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<SocketConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
