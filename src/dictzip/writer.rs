//! Chunked compression into a dictzip archive.
//!
//! The header has to precede the data but holds the size of every chunk, so
//! compressed chunks are collected in spill storage (memory first, then a
//! temporary file) and only copied to the destination on close.

use std::io::{self, Seek, SeekFrom, Write};

use crc32fast::Hasher;
use flate2::Compression;
use log::{debug, info, warn};
use tempfile::SpooledTempFile;

use super::codec::engine::{DeflateEngine, FlateDeflater};
use super::format;
use super::types::error::{DictzipError, HeaderError, IoContext, Result};
use super::types::models::{ExtraFlags, Metadata};
use super::{DEFAULT_CHUNK_SIZE, SPILL_MEMORY_LIMIT};

/// Writes a dictzip archive to `W`.
///
/// Nothing reaches the destination until [`close`](Self::close) or
/// [`finish`](Self::finish). Dropping an unclosed writer closes it and
/// ignores any error; call `finish` to see them.
///
/// Header fields live in the public [`metadata`](Self::metadata) field and
/// may be changed at any time before closing.
pub struct DictzipWriter<W: Write> {
    pub metadata: Metadata,
    dest: Option<W>,
    engine: Box<dyn DeflateEngine + Send>,
    level: Compression,
    chunk_size: u16,
    /// Compressed bytes of the chunk in progress.
    chunk_buf: Vec<u8>,
    /// Completed chunks, in order.
    spill: SpooledTempFile,
    sizes: Vec<u16>,
    digest: Hasher,
    total_in: u64,
    /// Input was given to the engine since the last chunk flush.
    has_data: bool,
    header_crc: bool,
    /// Set when a write fails part way; later writes and close report it.
    failure: Option<String>,
    closed: bool,
}

impl<W: Write> DictzipWriter<W> {
    /// Writer with the default compression level and [`DEFAULT_CHUNK_SIZE`].
    pub fn new(dest: W) -> Self {
        Self::build(dest, Compression::default(), DEFAULT_CHUNK_SIZE)
    }

    /// Writer with an explicit compression level and chunk size.
    ///
    /// # Errors
    /// Returns `InvalidChunkSize` if `chunk_size` is 0.
    pub fn with_level(dest: W, level: Compression, chunk_size: u16) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DictzipError::InvalidChunkSize(chunk_size));
        }
        Ok(Self::build(dest, level, chunk_size))
    }

    fn build(dest: W, level: Compression, chunk_size: u16) -> Self {
        debug!("Creating dictzip writer: level={}, chunk_size={}", level.level(), chunk_size);
        Self {
            metadata: Metadata::default(),
            dest: Some(dest),
            engine: Box::new(FlateDeflater::new(level)),
            level,
            chunk_size,
            chunk_buf: Vec::new(),
            spill: SpooledTempFile::new(SPILL_MEMORY_LIMIT),
            sizes: Vec::new(),
            digest: Hasher::new(),
            total_in: 0,
            has_data: false,
            header_crc: false,
            failure: None,
            closed: false,
        }
    }

    /// Emit a header CRC-16 (FHCRC). Off by default.
    pub fn set_header_crc(&mut self, enabled: bool) {
        self.header_crc = enabled;
    }

    pub fn chunk_size(&self) -> u16 {
        self.chunk_size
    }

    /// Compressed size of each chunk flushed so far.
    pub fn sizes(&self) -> &[u16] {
        &self.sizes
    }

    /// Uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.dest.as_ref()
    }

    /// Compress all of `data`, flushing a chunk at every chunk boundary.
    ///
    /// Output depends only on the concatenated input, never on how it was
    /// split between calls.
    ///
    /// If a chunk cannot be stored after part of `data` was already taken,
    /// the count of those bytes is returned and the error is reported by the
    /// next call. A failed writer rejects every later write and close.
    ///
    /// # Errors
    /// Returns `WriteAfterClose` once the writer is closed, `WriterFailed`
    /// after an earlier failure, or the engine or spill storage error that
    /// stopped it.
    pub fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(DictzipError::WriteAfterClose);
        }
        if let Some(reason) = &self.failure {
            return Err(DictzipError::WriterFailed(reason.clone()));
        }
        let chunk_size = u64::from(self.chunk_size);
        let mut consumed = 0;
        while consumed < data.len() {
            let room = (chunk_size - self.total_in % chunk_size) as usize;
            let end = consumed + room.min(data.len() - consumed);
            if let Err(e) = self.write_slice(&data[consumed..end]) {
                warn!("Write failed after {consumed} of {} bytes: {e}", data.len());
                self.failure = Some(e.to_string());
                return if consumed > 0 { Ok(consumed) } else { Err(e) };
            }
            consumed = end;
        }
        Ok(consumed)
    }

    /// Compress a slice that ends at or before the current chunk boundary.
    /// Its bytes count as accepted only once a chunk it completes is stored.
    fn write_slice(&mut self, slice: &[u8]) -> Result<()> {
        let fills_chunk = (self.total_in + slice.len() as u64) % u64::from(self.chunk_size) == 0;
        self.engine.write(slice, &mut self.chunk_buf)?;
        self.has_data = true;
        if fills_chunk {
            self.flush_chunk()?;
        }
        self.digest.update(slice);
        self.total_in += slice.len() as u64;
        Ok(())
    }

    /// End the current chunk with a sync marker and move it to spill storage.
    fn flush_chunk(&mut self) -> Result<()> {
        if !self.has_data {
            return Ok(());
        }
        self.engine.sync_flush(&mut self.chunk_buf)?;

        let size = u16::try_from(self.chunk_buf.len()).map_err(|_| HeaderError::FieldTooLarge {
            field: "chunk size entry",
            value: self.chunk_buf.len() as u64,
        })?;
        if self.sizes.len() >= usize::from(u16::MAX) {
            return Err(HeaderError::FieldTooLarge {
                field: "CHCNT",
                value: self.sizes.len() as u64 + 1,
            }
            .into());
        }
        self.sizes.push(size);
        self.spill.write_all(&self.chunk_buf).context("spilling chunk")?;
        debug!("Flushed chunk {}: {} bytes compressed", self.sizes.len() - 1, size);

        self.chunk_buf.clear();
        self.engine.reset();
        self.has_data = false;
        Ok(())
    }

    /// Finish the archive: flush the last chunk, then write the header, the
    /// chunks, the end marker and the trailer to the destination.
    ///
    /// Calling it again does nothing. If it fails the writer is still
    /// closed and the destination holds a partial archive. A writer whose
    /// earlier write failed writes nothing and returns `WriterFailed`.
    ///
    /// # Errors
    /// Returns a `Header` error if a metadata field cannot be encoded, or the
    /// I/O error from the spill storage or the destination.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(reason) = self.failure.take() {
            return Err(DictzipError::WriterFailed(reason));
        }

        self.flush_chunk()?;
        self.engine.finish(&mut self.chunk_buf)?;
        if self.sizes.is_empty() && self.total_in > 0 {
            warn!("Closing with {} input bytes but no chunks", self.total_in);
        }

        let header = format::header::encode(
            &self.metadata,
            self.chunk_size,
            &self.sizes,
            ExtraFlags::from(self.level),
            self.header_crc,
        )?;

        let Some(dest) = self.dest.as_mut() else {
            return Ok(());
        };
        dest.write_all(&header).context("writing header")?;
        self.spill.seek(SeekFrom::Start(0)).context("rewinding spill storage")?;
        io::copy(&mut self.spill, dest).context("writing chunk data")?;
        dest.write_all(&self.chunk_buf).context("writing end marker")?;

        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&self.digest.clone().finalize().to_le_bytes());
        // ISIZE is the input length modulo 2^32.
        trailer[4..].copy_from_slice(&(self.total_in as u32).to_le_bytes());
        dest.write_all(&trailer).context("writing trailer")?;
        dest.flush().context("flushing destination")?;

        info!(
            "Wrote dictzip archive: {} chunks, {} bytes in, header {} bytes",
            self.sizes.len(),
            self.total_in,
            header.len()
        );
        Ok(())
    }

    /// Close the writer and return the destination.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        self.dest.take().ok_or_else(|| DictzipError::Io {
            context: "finishing writer",
            source: io::Error::other("destination already taken"),
        })
    }
}

impl<W: Write> Write for DictzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_data(buf)?)
    }

    /// Chunks are only written on close, so there is nothing to flush.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for DictzipWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Failed to close dictzip writer on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = DictzipWriter::with_level(Vec::new(), Compression::default(), 0);
        assert!(matches!(result, Err(DictzipError::InvalidChunkSize(0))));
    }

    #[test]
    fn chunks_flush_on_exact_boundaries() {
        let mut writer = DictzipWriter::with_level(Vec::new(), Compression::default(), 4).expect("writer");
        writer.write_data(b"abc").expect("write");
        assert!(writer.sizes().is_empty());
        writer.write_data(b"d").expect("write");
        assert_eq!(writer.sizes().len(), 1);
        writer.write_data(b"efghij").expect("write");
        assert_eq!(writer.sizes().len(), 2);
        assert_eq!(writer.total_in(), 10);
        writer.close().expect("close");
        assert_eq!(writer.sizes().len(), 3);
    }

    #[test]
    fn empty_writes_do_not_create_chunks() {
        let mut writer = DictzipWriter::with_level(Vec::new(), Compression::default(), 4).expect("writer");
        assert_eq!(writer.write_data(&[]).expect("write"), 0);
        writer.close().expect("close");
        assert!(writer.sizes().is_empty());
    }

    #[test]
    fn write_after_close_fails() {
        let mut writer = DictzipWriter::new(Vec::new());
        writer.close().expect("close");
        assert!(writer.is_closed());
        assert!(matches!(writer.write_data(b"x"), Err(DictzipError::WriteAfterClose)));
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn invalid_name_fails_close_and_leaves_writer_closed() {
        let mut writer = DictzipWriter::new(Vec::new());
        writer.metadata.name = Some("\u{4e2d}".to_string());
        let err = writer.close().unwrap_err();
        assert!(matches!(err, DictzipError::Header(HeaderError::InvalidString)));
        assert!(writer.is_closed());
        assert!(writer.close().is_ok());
        assert!(writer.get_ref().is_some_and(|dest| dest.is_empty()));
    }

    #[test]
    fn xfl_follows_level() {
        let best = DictzipWriter::with_level(Vec::new(), Compression::best(), 16)
            .expect("writer")
            .finish()
            .expect("finish");
        assert_eq!(best[8], 2);
        let fast = DictzipWriter::with_level(Vec::new(), Compression::fast(), 16)
            .expect("writer")
            .finish()
            .expect("finish");
        assert_eq!(fast[8], 4);
        let default = DictzipWriter::new(Vec::new()).finish().expect("finish");
        assert_eq!(default[8], 0);
    }
}
