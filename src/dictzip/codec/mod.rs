//! Deflate engines and the seekable chunk decoder.

pub mod engine;
pub mod stream;
