use std::io::{Cursor, Read, Write};
use std::time::SystemTime;

use bytes::Bytes;
use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::codec::{unix_seconds, unsupported, PayloadCodec};
use crate::error::Result;
use crate::format::Format;
use crate::payload::{Container, Payload, TIMESTAMP_KEY};

/// CONTAINER codec: a deflate-compressed zip archive whose entry names are
/// the container paths.
///
/// A timestamp is stored as an 8-byte little-endian `f64` entry named
/// `timestamp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerCodec;

impl PayloadCodec for ContainerCodec {
    fn format(&self) -> Format {
        Format::Container
    }

    fn encode(&self, payload: &Payload, timestamp: Option<SystemTime>) -> Result<Bytes> {
        let Payload::Container(container) = payload else {
            return Err(unsupported(Format::Container, payload));
        };

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (path, data) in container.iter() {
            if timestamp.is_some() && path == TIMESTAMP_KEY {
                continue;
            }
            zip.start_file(path, entry_options())?;
            zip.write_all(data)?;
        }
        if let Some(time) = timestamp {
            zip.start_file(TIMESTAMP_KEY, entry_options())?;
            zip.write_all(&unix_seconds(time).to_le_bytes())?;
        }

        let encoded = zip.finish()?.into_inner();
        trace!(entries = container.len(), len = encoded.len(), "encoded container");
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, bytes: Bytes) -> Result<Payload> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut container = Container::new();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let path = entry.name().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            container.insert(&path, data);
        }

        Ok(Payload::Container(container))
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}
