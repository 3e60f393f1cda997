//! Custom error types for the dictzip crate.

use std::io;

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum DictzipError {
    /// An error originating from I/O on the source, the sink or the spill storage.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The gzip header is not a valid dictzip header.
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),

    /// The input ended in the middle of the header.
    #[error("truncated header: unexpected end of input while {context}")]
    Truncated { context: &'static str },

    /// The deflate engine rejected the data it was given.
    #[error("deflate stream error: {0}")]
    Deflate(String),

    /// The CRC-32 or ISIZE stored in the trailer does not match the data.
    #[error(
        "trailer mismatch: crc {actual_crc:#010x} (expected {expected_crc:#010x}), \
         size {actual_size} (expected {expected_size})"
    )]
    TrailerMismatch {
        expected_crc: u32,
        actual_crc: u32,
        expected_size: u32,
        actual_size: u32,
    },

    /// A seek would move the cursor before the start of the data.
    #[error("negative offset: {offset}")]
    NegativeOffset { offset: i128 },

    /// Seeking relative to the end is not supported; the total size is not
    /// known without decompressing the whole archive.
    #[error("unsupported seek mode: seeking from the end")]
    UnsupportedSeek,

    /// `write` was called after the writer was closed.
    #[error("write called on a closed writer")]
    WriteAfterClose,

    /// An earlier write failed; the archive can no longer be completed.
    #[error("writer failed earlier: {0}")]
    WriterFailed(String),

    /// Chunk sizes must be in `1..=65535`.
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u16),
}

/// Reasons a header is rejected, either while parsing or while encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("bad magic bytes {0:02x?}")]
    InvalidMagic([u8; 2]),

    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u8),

    #[error("no EXTRA field")]
    MissingExtraField,

    #[error("no RA subfield in EXTRA")]
    MissingRaField,

    #[error("unsupported RA version {0}")]
    UnsupportedVersion(u16),

    /// A value does not fit its on-disk field.
    #[error("{field} exceeded: {value}")]
    FieldTooLarge { field: &'static str, value: u64 },

    #[error("string exceeds {limit} bytes")]
    StringTooLong { limit: usize },

    /// Strings must be Latin-1 without embedded NUL characters.
    #[error("string is not representable in Latin-1")]
    InvalidString,

    /// User supplied EXTRA bytes are malformed or use the reserved RA id.
    #[error("invalid EXTRA subfields: {0}")]
    InvalidExtra(String),

    #[error("bad CRC-16: stored {expected:#06x}, computed {actual:#06x}")]
    BadHeaderCrc { expected: u16, actual: u16 },
}

/// A convenience `Result` type alias using the crate's `DictzipError` type.
pub type Result<T> = std::result::Result<T, DictzipError>;

/// Attaches an operation name to I/O failures.
pub(crate) trait IoContext<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| DictzipError::Io { context, source })
    }
}

impl From<DictzipError> for io::Error {
    fn from(err: DictzipError) -> Self {
        match err {
            DictzipError::Io { ref source, .. } => {
                let kind = source.kind();
                io::Error::new(kind, err)
            }
            DictzipError::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            DictzipError::NegativeOffset { .. }
            | DictzipError::UnsupportedSeek
            | DictzipError::InvalidChunkSize(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            DictzipError::WriteAfterClose | DictzipError::WriterFailed(_) => io::Error::other(err),
            _ => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}
