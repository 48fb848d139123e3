use std::io::{Read, Write};
use std::sync::{Mutex, PoisonError};

use datasocket_frame::{FrameReader, FrameWriter};
use datasocket_payload::Format;

use crate::error::{PeerError, Result};

/// Write the format tag that opens every non-RAW stream.
pub fn send_format<W: Write>(writer: &mut FrameWriter<W>, format: Format) -> Result<()> {
    if format.is_raw() {
        return Err(PeerError::Handshake(
            "raw streams do not carry a format tag".to_string(),
        ));
    }
    writer.write_word(format.tag())?;
    Ok(())
}

/// Read the format tag at the start of a stream (blocking).
pub fn receive_format<R: Read>(reader: &mut FrameReader<R>) -> Result<Format> {
    let tag = reader.read_word()?;
    let format = Format::try_from(tag)
        .map_err(|_| PeerError::Handshake(format!("unknown format tag {tag}")))?;
    if format.is_raw() {
        return Err(PeerError::Handshake(
            "peer announced raw format on a framed stream".to_string(),
        ));
    }
    Ok(format)
}

/// Decides which announced formats a receiver accepts.
///
/// With a fixed format only that tag is accepted. Without one, the first
/// successful handshake is adopted and every later connection must match it.
#[derive(Debug)]
pub struct FormatNegotiator {
    fixed: Option<Format>,
    adopted: Mutex<Option<Format>>,
}

impl FormatNegotiator {
    pub fn new(fixed: Option<Format>) -> Self {
        Self {
            fixed,
            adopted: Mutex::new(fixed),
        }
    }

    /// Accept or reject a format announced by a new connection.
    pub fn accept(&self, announced: Format) -> Result<Format> {
        let mut adopted = self.adopted.lock().unwrap_or_else(PoisonError::into_inner);
        match *adopted {
            Some(expected) if expected != announced => {
                let origin = if self.fixed.is_some() {
                    "configured"
                } else {
                    "negotiated"
                };
                Err(PeerError::Handshake(format!(
                    "peer announced {announced}, {origin} format is {expected}"
                )))
            }
            Some(expected) => Ok(expected),
            None => {
                *adopted = Some(announced);
                Ok(announced)
            }
        }
    }

    /// Format in effect: the configured one, or the first adopted.
    pub fn current(&self) -> Option<Format> {
        *self.adopted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}
