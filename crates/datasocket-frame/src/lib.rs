//! Message framing for datasocket.
//!
//! Stream sockets carry every message as:
//! - a 4-byte little-endian payload length
//! - the payload bytes
//!
//! A connection additionally starts with one 4-byte little-endian word (the
//! format tag), read and written through the same reader/writer so no bytes
//! are lost between handshake and the first frame.
//!
//! Two alternatives live alongside the framed stream:
//! - [`WindowReader`] for unframed RAW streams, which treats "the socket has
//!   been drained" as the end of a message
//! - [`DatagramAssembler`] for UDP, where length and payload travel as two
//!   consecutive datagrams
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod datagram;
pub mod error;
pub mod reader;
pub mod window;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, frame_bytes, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use datagram::{length_datagram, DatagramAssembler, MAX_DATAGRAM_PAYLOAD};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use window::{SetNonblocking, WindowReader, DEFAULT_WINDOW_CAPACITY};
pub use writer::FrameWriter;
