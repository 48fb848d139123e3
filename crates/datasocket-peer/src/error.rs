/// Errors that can occur in socket operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] datasocket_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] datasocket_frame::FrameError),

    /// The socket configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The format handshake failed or was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// `start` was called on a socket that is already running.
    #[error("socket is already running")]
    AlreadyRunning,

    /// A background thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PeerError>;
