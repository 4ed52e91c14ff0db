/// Error surface of the decoder and the byte sources.
///
/// The decoder stops at the first format or I/O error and returns no partial
/// file. Estimator configuration mistakes are programming errors and assert
/// instead of flowing through here.
#[derive(Debug, thiserror::Error)]
pub enum GgufError {
    #[error("invalid GGUF format: {0}")]
    InvalidFormat(String),

    #[error("unsupported GGUF format: {0}")]
    UnsupportedFormat(String),

    #[error("truncated file while reading {field}")]
    Truncated { field: &'static str },

    #[error("invalid alignment {0}: must be a positive multiple of 8")]
    InvalidAlignment(u64),

    #[error("cancelled while reading {field}")]
    Cancelled { field: &'static str },

    #[error("reading {field} failed: {source}")]
    Io {
        field: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("cache miss for key '{key}'")]
    CacheMissed { key: String },

    #[error("corrupted cache entry for key '{key}': {message}")]
    CacheCorrupted { key: String, message: String },
}

impl GgufError {
    /// Attach the field being read to an I/O error, mapping a short read to
    /// `Truncated`.
    pub fn from_io_error(field: &'static str, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Truncated { field },
            _ => Self::Io {
                field,
                source: error,
            },
        }
    }
}

pub type GgufResult<T> = std::result::Result<T, GgufError>;
