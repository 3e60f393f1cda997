//! # dictzip
//!
//! Reader and writer for dictzip archives: gzip files whose deflate stream is
//! split into independently decodable chunks, so any byte range of the
//! uncompressed data can be read without decompressing everything before it.
//!
//! Archives written here are ordinary gzip files and decompress with `gzip -d`.
//!
//! ```no_run
//! use dictzip::DictzipReader;
//!
//! let mut reader = DictzipReader::open("words.dict.dz")?;
//! let mut entry = vec![0u8; 64];
//! let n = reader.read_at(&mut entry, 1_000_000)?;
//! println!("{}", String::from_utf8_lossy(&entry[..n]));
//! # Ok::<(), dictzip::DictzipError>(())
//! ```
pub mod dictzip;

// Re-export the main types for convenience
pub use dictzip::{
    DictzipError,
    DictzipHeader,
    DictzipReader,
    DictzipWriter,
    ExtraFlags,
    HeaderError,
    Metadata,
    OperatingSystem,
    Result,
    Whence,
    DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE,
    MAX_STRING_LEN,
    SPILL_MEMORY_LIMIT,
};
