use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::payload::Payload;

/// Turns payloads into wire bytes and back for one [`Format`].
///
/// Implementations are stateless; one instance per format is shared by
/// every socket through [`Format::codec`].
pub trait PayloadCodec: Send + Sync {
    /// Format this codec implements.
    fn format(&self) -> Format;

    /// Encode a payload. When `timestamp` is set, the codec embeds it as
    /// seconds since the UNIX epoch in its format-specific place.
    fn encode(&self, payload: &Payload, timestamp: Option<SystemTime>) -> Result<Bytes>;

    /// Decode one complete message.
    fn decode(&self, bytes: Bytes) -> Result<Payload>;
}

/// Seconds since the UNIX epoch as `f64`; times before the epoch are negative.
pub fn unix_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(err) => -err.duration().as_secs_f64(),
    }
}

pub(crate) fn unsupported(format: Format, payload: &Payload) -> CodecError {
    CodecError::Unsupported {
        format,
        payload: payload.kind(),
    }
}
