use std::time::SystemTime;

use bytes::Bytes;

use crate::codec::{unsupported, PayloadCodec};
use crate::error::Result;
use crate::format::Format;
use crate::payload::Payload;

/// RAW codec: bytes pass through untouched. Timestamps are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl PayloadCodec for RawCodec {
    fn format(&self) -> Format {
        Format::Raw
    }

    fn encode(&self, payload: &Payload, _timestamp: Option<SystemTime>) -> Result<Bytes> {
        match payload {
            Payload::Raw(bytes) => Ok(bytes.clone()),
            other => Err(unsupported(Format::Raw, other)),
        }
    }

    fn decode(&self, bytes: Bytes) -> Result<Payload> {
        Ok(Payload::Raw(bytes))
    }
}
