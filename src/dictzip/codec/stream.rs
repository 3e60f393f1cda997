//! A deflate decoder bound to a seekable compressed source.

use std::io::{self, Read, Seek, SeekFrom};

use log::trace;

use super::engine::InflateEngine;
use crate::dictzip::types::error::{DictzipError, IoContext, Result};

/// Size of the compressed input buffer.
const INPUT_BUFFER_SIZE: usize = 32 * 1024;

/// Decodes raw deflate data from `source`, starting wherever the last
/// [`ChunkStream::reset_to`] placed it.
///
/// Chunks of a dictzip member are one continuous deflate stream cut at sync
/// markers, so a stream reset at the start of chunk `n` keeps producing the
/// data of chunks `n+1..` until the final block.
pub struct ChunkStream<R> {
    source: R,
    engine: Box<dyn InflateEngine + Send>,
    input: Box<[u8]>,
    pos: usize,
    cap: usize,
    /// Compressed offset of the last reset.
    start: u64,
    /// Compressed bytes handed to the engine since the last reset.
    consumed: u64,
    source_eof: bool,
    finished: bool,
}

impl<R: Read + Seek> ChunkStream<R> {
    /// Wrap `source`. Nothing is read until the first [`reset_to`](Self::reset_to).
    pub fn new(source: R, engine: Box<dyn InflateEngine + Send>) -> Self {
        Self {
            source,
            engine,
            input: vec![0u8; INPUT_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            start: 0,
            consumed: 0,
            source_eof: false,
            finished: false,
        }
    }

    /// Seek the source to `offset` and restart the decoder with no history.
    pub fn reset_to(&mut self, offset: u64) -> Result<()> {
        trace!("Resetting inflate stream to compressed offset {offset}");
        self.source.seek(SeekFrom::Start(offset)).context("seeking to chunk")?;
        self.engine.reset();
        self.pos = 0;
        self.cap = 0;
        self.start = offset;
        self.consumed = 0;
        self.source_eof = false;
        self.finished = false;
        Ok(())
    }

    /// Compressed offset just past the input the decoder has used so far.
    ///
    /// Once the stream has ended this is the position of the gzip trailer.
    pub fn compressed_position(&self) -> u64 {
        self.start + self.consumed
    }

    /// Whether the final deflate block has been decoded.
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode up to `buf.len()` bytes. `Ok(0)` means the final block was
    /// reached; a source that ends before that is an error.
    pub fn read_inflated(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.finished {
            return Ok(0);
        }
        loop {
            if self.pos == self.cap && !self.source_eof {
                self.fill_input()?;
            }

            let status = self.engine.inflate(&self.input[self.pos..self.cap], buf)?;
            self.pos += status.consumed;
            self.consumed += status.consumed as u64;

            if status.stream_end {
                self.finished = true;
                return Ok(status.produced);
            }
            if status.produced > 0 {
                return Ok(status.produced);
            }
            if status.consumed == 0 {
                if self.source_eof {
                    return Err(DictzipError::Io {
                        context: "reading chunk data",
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "compressed data ended before the final deflate block",
                        ),
                    });
                }
                self.fill_input()?;
            }
        }
    }

    /// Move unread input to the front of the buffer and read more behind it.
    fn fill_input(&mut self) -> Result<()> {
        self.input.copy_within(self.pos..self.cap, 0);
        self.cap -= self.pos;
        self.pos = 0;
        if self.cap == self.input.len() {
            return Err(DictzipError::Deflate(
                "decoder made no progress on a full input buffer".to_string(),
            ));
        }
        loop {
            match self.source.read(&mut self.input[self.cap..]) {
                Ok(0) => {
                    self.source_eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.cap += n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("reading chunk data"),
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

#[cfg(test)]
impl<R: Read + Seek> Read for ChunkStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_inflated(buf)?)
    }
}
