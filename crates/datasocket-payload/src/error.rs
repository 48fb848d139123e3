use crate::format::Format;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A format tag that is not one of the known formats.
    #[error("unknown format tag {0}")]
    UnknownFormat(u32),

    /// A format name that could not be parsed.
    #[error("unknown format name '{0}'")]
    UnknownFormatName(String),

    /// The payload kind cannot be carried by the codec's format.
    #[error("{format} codec cannot encode a {payload} payload")]
    Unsupported {
        format: Format,
        payload: &'static str,
    },

    /// A compressed NumPy archive could not be written.
    #[error("failed to write npz archive: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    /// A compressed NumPy archive could not be read.
    #[error("failed to read npz archive: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    /// An array could not be expressed in the requested shape.
    #[error("invalid array: {0}")]
    Shape(String),

    /// JSON serialization or parsing failed.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A zip container could not be written or read.
    #[error("zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while reading container entries.
    #[error("payload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
