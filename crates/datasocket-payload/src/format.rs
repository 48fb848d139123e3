use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::array::ArrayCodec;
use crate::codec::PayloadCodec;
use crate::container::ContainerCodec;
use crate::error::CodecError;
use crate::raw::RawCodec;
use crate::text::TextCodec;

/// Payload format, sent once as the connection handshake word.
///
/// Wire values are fixed: ARRAY=1, TEXT=2, CONTAINER=3, RAW=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum Format {
    /// Named numeric arrays as a compressed `.npz` archive.
    Array = 1,
    /// A JSON document.
    Text = 2,
    /// Hierarchical entries in a zip archive.
    Container = 3,
    /// Uninterpreted bytes. Never sent as a handshake.
    Raw = 4,
}

static ARRAY_CODEC: ArrayCodec = ArrayCodec;
static TEXT_CODEC: TextCodec = TextCodec;
static CONTAINER_CODEC: ContainerCodec = ContainerCodec;
static RAW_CODEC: RawCodec = RawCodec;

impl Format {
    /// All formats in tag order.
    pub const ALL: [Format; 4] = [Format::Array, Format::Text, Format::Container, Format::Raw];

    /// The 4-byte handshake value for this format.
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Lowercase name used in logs and on the command line.
    pub const fn name(self) -> &'static str {
        match self {
            Format::Array => "array",
            Format::Text => "text",
            Format::Container => "container",
            Format::Raw => "raw",
        }
    }

    /// Codec that encodes and decodes payloads of this format.
    pub fn codec(self) -> &'static dyn PayloadCodec {
        match self {
            Format::Array => &ARRAY_CODEC,
            Format::Text => &TEXT_CODEC,
            Format::Container => &CONTAINER_CODEC,
            Format::Raw => &RAW_CODEC,
        }
    }

    /// RAW streams skip the handshake and (by default) the length prefix.
    pub const fn is_raw(self) -> bool {
        matches!(self, Format::Raw)
    }
}

impl TryFrom<u32> for Format {
    type Error = CodecError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Format::Array),
            2 => Ok(Format::Text),
            3 => Ok(Format::Container),
            4 => Ok(Format::Raw),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }
}

impl From<Format> for u32 {
    fn from(format: Format) -> Self {
        format.tag()
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Format::ALL
            .into_iter()
            .find(|format| format.name() == lowered)
            .ok_or_else(|| CodecError::UnknownFormatName(s.to_string()))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
