//! Payload formats for datasocket.
//!
//! Every connection carries one [`Format`], announced once as a 4-byte tag.
//! Each format has a stateless [`PayloadCodec`]:
//! - ARRAY: named `f64` arrays in a compressed `.npz` archive
//! - TEXT: JSON
//! - CONTAINER: path-addressed blobs in a zip archive
//! - RAW: bytes as given
//!
//! Codecs are looked up with [`Format::codec`], so sockets pick one at
//! construction and never branch on the format again.

pub mod array;
pub mod codec;
pub mod container;
pub mod error;
pub mod format;
pub mod payload;
pub mod raw;
pub mod text;

pub use array::{array_to_json, json_to_array, ArrayCodec};
pub use codec::{unix_seconds, PayloadCodec};
pub use container::ContainerCodec;
pub use error::{CodecError, Result};
pub use format::Format;
pub use payload::{ArrayBundle, Container, Payload, DATA_KEY, TIMESTAMP_KEY};
pub use raw::RawCodec;
pub use text::TextCodec;

pub use ndarray;
