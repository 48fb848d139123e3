use bytes::Bytes;
use tracing::debug;

use crate::codec::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Build the 4-byte length datagram that precedes a payload datagram.
pub fn length_datagram(payload_len: usize) -> Result<[u8; HEADER_SIZE]> {
    if payload_len > MAX_DATAGRAM_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: MAX_DATAGRAM_PAYLOAD,
        });
    }
    Ok((payload_len as u32).to_le_bytes())
}

/// Pairs `[length datagram][payload datagram]` back into payloads.
///
/// UDP may drop or reorder datagrams, so the assembler never trusts a pair
/// blindly: a payload whose size differs from the announced length is
/// discarded, and any 4-byte datagram seen while waiting for a payload is
/// taken as a fresh length header so the stream resynchronises.
#[derive(Debug)]
pub struct DatagramAssembler {
    expected: Option<usize>,
    max_payload: usize,
}

impl Default for DatagramAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD.min(MAX_DATAGRAM_PAYLOAD))
    }
}

impl DatagramAssembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            expected: None,
            max_payload,
        }
    }

    /// Feed one received datagram.
    ///
    /// Returns `Ok(Some(payload))` when a pair completes, `Ok(None)` after a
    /// length header, and an error for a datagram that had to be discarded.
    /// The assembler stays usable after an error.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<Bytes>> {
        match self.expected.take() {
            None => self.accept_header(datagram).map(|()| None),
            Some(expected) if datagram.len() == expected => {
                Ok(Some(Bytes::copy_from_slice(datagram)))
            }
            Some(expected) => {
                if datagram.len() == HEADER_SIZE {
                    debug!(expected, "length datagram replaced a missing payload");
                    if let Err(err) = self.accept_header(datagram) {
                        debug!(error = %err, "replacement length datagram rejected");
                    }
                }
                Err(FrameError::LengthMismatch {
                    expected,
                    received: datagram.len(),
                })
            }
        }
    }

    fn accept_header(&mut self, datagram: &[u8]) -> Result<()> {
        let header: [u8; HEADER_SIZE] = datagram
            .try_into()
            .map_err(|_| FrameError::MissingHeader {
                len: datagram.len(),
            })?;
        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }
        self.expected = Some(len);
        Ok(())
    }

    /// True while a length header is waiting for its payload.
    pub fn is_pending(&self) -> bool {
        self.expected.is_some()
    }
}
