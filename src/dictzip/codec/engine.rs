//! Streaming deflate engines.
//!
//! The reader and writer only talk to the [`InflateEngine`] and
//! [`DeflateEngine`] traits. The flate2 adapters below drive raw deflate
//! streams (no zlib or gzip wrapper) through `flate2::Compress` and
//! `flate2::Decompress`.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::trace;

use crate::dictzip::types::error::{DictzipError, Result};

/// Output space reserved before each compressor call. Larger than the
/// compressed form of any single chunk, so a flush always completes in one
/// call.
const OUTPUT_RESERVE: usize = 128 * 1024;

/// Compression side of a raw deflate stream.
pub trait DeflateEngine {
    /// Compresses all of `input`, appending any output to `out`.
    fn write(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Flushes pending data and emits a byte-aligned sync marker
    /// (`00 00 FF FF`). Emits the marker even when nothing is pending.
    fn sync_flush(&mut self, out: &mut Vec<u8>) -> Result<()>;

    /// Emits the final block of the stream.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;

    /// Starts a new stream with an empty dictionary.
    fn reset(&mut self);
}

/// Progress made by one [`InflateEngine::inflate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflateStatus {
    pub consumed: usize,
    pub produced: usize,
    /// The final block has been decoded.
    pub stream_end: bool,
}

/// Decompression side of a raw deflate stream.
pub trait InflateEngine {
    /// Decodes from `input` into `output`.
    ///
    /// May return fewer bytes than `output` holds even when more input is
    /// available, e.g. when it reaches a sync marker.
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus>;

    /// Forgets all state so decoding can start cold at a new position.
    fn reset(&mut self);
}

/// [`DeflateEngine`] backed by `flate2::Compress`.
pub struct FlateDeflater {
    engine: Compress,
}

impl FlateDeflater {
    pub fn new(level: Compression) -> Self {
        Self {
            // false = raw deflate, no zlib header
            engine: Compress::new(level, false),
        }
    }

    fn run(&mut self, mut input: &[u8], out: &mut Vec<u8>, flush: FlushCompress) -> Result<Status> {
        loop {
            out.reserve(OUTPUT_RESERVE.max(input.len() / 2));
            let before_in = self.engine.total_in();
            let status = self
                .engine
                .compress_vec(input, out, flush)
                .map_err(|e| DictzipError::Deflate(e.to_string()))?;
            let consumed = (self.engine.total_in() - before_in) as usize;
            input = &input[consumed..];

            // Done once all input is taken and the engine stopped short of
            // filling the output space it was given.
            if input.is_empty() && (status == Status::StreamEnd || out.len() < out.capacity()) {
                return Ok(status);
            }
        }
    }
}

impl DeflateEngine for FlateDeflater {
    fn write(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.run(input, out, FlushCompress::None)?;
        Ok(())
    }

    fn sync_flush(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.run(&[], out, FlushCompress::Sync)?;
        trace!("Sync flush: {} bytes buffered", out.len());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        loop {
            if self.run(&[], out, FlushCompress::Finish)? == Status::StreamEnd {
                return Ok(());
            }
        }
    }

    fn reset(&mut self) {
        self.engine.reset();
    }
}

/// [`InflateEngine`] backed by `flate2::Decompress`.
pub struct FlateInflater {
    engine: Decompress,
}

impl FlateInflater {
    pub fn new() -> Self {
        Self {
            // false = raw deflate, no zlib header
            engine: Decompress::new(false),
        }
    }
}

impl Default for FlateInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl InflateEngine for FlateInflater {
    fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<InflateStatus> {
        let before_in = self.engine.total_in();
        let before_out = self.engine.total_out();
        let status = self
            .engine
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| DictzipError::Deflate(e.to_string()))?;
        Ok(InflateStatus {
            consumed: (self.engine.total_in() - before_in) as usize,
            produced: (self.engine.total_out() - before_out) as usize,
            stream_end: status == Status::StreamEnd,
        })
    }

    fn reset(&mut self) {
        self.engine.reset(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC_MARKER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

    fn inflate_all(data: &[u8]) -> (Vec<u8>, bool) {
        let mut inflater = FlateInflater::new();
        let mut out = vec![0u8; 1024];
        let status = inflater.inflate(data, &mut out).expect("inflate");
        out.truncate(status.produced);
        (out, status.stream_end)
    }

    #[test]
    fn sync_flush_ends_on_marker() {
        let mut deflater = FlateDeflater::new(Compression::default());
        let mut out = Vec::new();
        deflater.write(b"chunk1", &mut out).expect("write");
        deflater.sync_flush(&mut out).expect("flush");
        assert!(out.ends_with(&SYNC_MARKER));

        let (plain, stream_end) = inflate_all(&out);
        assert_eq!(plain, b"chunk1");
        assert!(!stream_end);
    }

    #[test]
    fn sync_flush_without_input_still_emits_marker() {
        let mut deflater = FlateDeflater::new(Compression::default());
        let mut out = Vec::new();
        deflater.sync_flush(&mut out).expect("flush");
        assert!(out.ends_with(&SYNC_MARKER));
    }

    #[test]
    fn reset_chunks_decode_cold_and_concatenated() {
        let mut deflater = FlateDeflater::new(Compression::best());
        let mut first = Vec::new();
        deflater.write(b"abcabcabc", &mut first).expect("write");
        deflater.sync_flush(&mut first).expect("flush");
        deflater.reset();

        let mut second = Vec::new();
        deflater.write(b"abcabcabc", &mut second).expect("write");
        deflater.sync_flush(&mut second).expect("flush");
        deflater.finish(&mut second).expect("finish");

        let (cold, stream_end) = inflate_all(&second);
        assert_eq!(cold, b"abcabcabc");
        assert!(stream_end);

        let mut both = first.clone();
        both.extend_from_slice(&second);
        let (whole, stream_end) = inflate_all(&both);
        assert_eq!(whole, b"abcabcabcabcabcabc");
        assert!(stream_end);
    }

    #[test]
    fn finish_on_empty_stream_is_decodable() {
        let mut deflater = FlateDeflater::new(Compression::default());
        let mut out = Vec::new();
        deflater.finish(&mut out).expect("finish");
        assert!(!out.is_empty());
        let (plain, stream_end) = inflate_all(&out);
        assert!(plain.is_empty());
        assert!(stream_end);
    }
}
