//! Random access gzip ("dictzip") archives.
//!
//! A dictzip file is an ordinary gzip member whose deflate stream is cut into
//! chunks of `chunk_size` uncompressed bytes. Each chunk ends in a sync flush
//! and the compressor starts over with no history, so any chunk can be
//! decoded without touching the ones before it. The compressed size of every
//! chunk is stored in the `RA` subfield of the gzip EXTRA field.
//!
//! Use [`DictzipReader`] to read and [`DictzipWriter`] to create archives.

pub(crate) mod codec;
pub(crate) mod format;
pub mod reader;
pub mod types;
mod utils;
pub mod writer;

pub use reader::{DictzipReader, Whence};
pub use types::error::{DictzipError, HeaderError, Result};
pub use types::models::{DictzipHeader, ExtraFlags, Metadata, OperatingSystem};
pub use writer::DictzipWriter;

/// Chunk size used by dictzip(1). An incompressible chunk of this size still
/// compresses to at most 65535 bytes.
pub const DEFAULT_CHUNK_SIZE: u16 = 58315;

/// Largest chunk size the RA subfield can describe.
pub const MAX_CHUNK_SIZE: u16 = u16::MAX;

/// Longest NAME or COMMENT accepted, including the NUL terminator.
pub const MAX_STRING_LEN: usize = 512;

/// Bytes of compressed chunks the writer keeps in memory before moving them
/// to a temporary file.
pub const SPILL_MEMORY_LIMIT: usize = 4 * 1024 * 1024;
