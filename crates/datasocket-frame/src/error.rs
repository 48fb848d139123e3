/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// A payload datagram did not match the length announced before it.
    #[error("datagram length mismatch (announced {expected}, received {received})")]
    LengthMismatch { expected: usize, received: usize },

    /// A datagram arrived where a 4-byte length datagram was expected.
    #[error("expected a length datagram, got {len} bytes")]
    MissingHeader { len: usize },
}

impl FrameError {
    /// True when the error means the stream can no longer be trusted and
    /// the connection must be dropped.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FrameError::ConnectionClosed
                | FrameError::Truncated { .. }
                | FrameError::PayloadTooLarge { .. }
                | FrameError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
