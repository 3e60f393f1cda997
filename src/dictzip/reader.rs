use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use log::{debug, info, trace, warn};

use super::codec::engine::FlateInflater;
use super::codec::stream::ChunkStream;
use super::format;
use super::types::error::{DictzipError, IoContext, Result};
use super::types::models::{DictzipHeader, Metadata, OperatingSystem};

/// Bytes of CRC-32 and ISIZE after the deflate stream.
const TRAILER_LEN: usize = 8;

/// Scratch size used to skip the start of a chunk.
const SKIP_BUFFER_SIZE: usize = 8 * 1024;

/// Reference point for [`DictzipReader::seek_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    /// Never supported; the uncompressed size is unknown without a full scan.
    End,
}

/// Random access reader for dictzip archives.
///
/// Implements [`Read`] and [`Seek`] over the uncompressed data, plus
/// [`read_at`](Self::read_at) for positioned reads that leave the cursor
/// alone. Every read seeks the underlying source, so one reader must not be
/// shared between threads without a lock.
pub struct DictzipReader<R> {
    header: DictzipHeader,
    offsets: Vec<u64>,
    stream: ChunkStream<R>,
    cursor: u64,
    /// Chunk the stream was last reset to and the uncompressed offset it will
    /// produce next, if the last read left it in a usable state.
    resume: Option<(usize, u64)>,
}

impl DictzipReader<File> {
    /// Open the archive at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its header is not a
    /// valid dictzip header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening dictzip file: {}", path.display());
        let file = File::open(path).context("opening archive")?;
        Self::new(file)
    }
}

impl<R: Read + Seek> DictzipReader<R> {
    /// Parse the header of the archive in `source`.
    ///
    /// The source is rewound to position 0 first. It is never closed by the
    /// reader; get it back with [`close`](Self::close).
    ///
    /// # Errors
    /// - `Header` if the magic, method, EXTRA field, RA subfield, a string or
    ///   the header CRC-16 is invalid
    /// - `Truncated` if the input ends inside the header
    /// - `Io` if the source fails
    pub fn new(mut source: R) -> Result<Self> {
        source.seek(SeekFrom::Start(0)).context("seeking to header")?;
        let header = {
            let mut buffered = io::BufReader::new(&mut source);
            format::header::parse(&mut buffered)?
        };
        let offsets = header.offsets();
        debug!("Chunk offsets: first={}, end={:?}", offsets[0], offsets.last());

        Ok(Self {
            header,
            offsets,
            stream: ChunkStream::new(source, Box::new(FlateInflater::new())),
            cursor: 0,
            resume: None,
        })
    }

    pub fn header(&self) -> &DictzipHeader {
        &self.header
    }

    pub fn metadata(&self) -> &Metadata {
        &self.header.metadata
    }

    pub fn name(&self) -> Option<&str> {
        self.header.metadata.name.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.header.metadata.comment.as_deref()
    }

    /// Modification time, `None` if the archive has MTIME 0.
    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.header.metadata.mod_time
    }

    pub fn os(&self) -> OperatingSystem {
        self.header.metadata.os
    }

    /// EXTRA subfields other than RA, verbatim.
    pub fn extra(&self) -> &[u8] {
        &self.header.metadata.extra
    }

    pub fn chunk_size(&self) -> u16 {
        self.header.chunk_size
    }

    /// Compressed size of each chunk.
    pub fn sizes(&self) -> &[u16] {
        &self.header.sizes
    }

    pub fn chunk_count(&self) -> usize {
        self.header.sizes.len()
    }

    /// Start of each chunk in the archive, plus the end of the last one.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// The sequential read cursor.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Read up to `buf.len()` uncompressed bytes starting at `offset`.
    ///
    /// Does not move the cursor. Returns `Ok(0)` at or past the end of the
    /// data and a short count when the data ends inside the request.
    ///
    /// # Errors
    /// Returns an error if the source fails or the compressed data is
    /// corrupt before any requested byte could be produced.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk_size = u64::from(self.header.chunk_size);
        let chunk = offset / chunk_size;
        if chunk >= self.header.sizes.len() as u64 {
            trace!("Offset {offset} is past the last chunk");
            return Ok(0);
        }
        let chunk = chunk as usize;

        if self.resume != Some((chunk, offset)) {
            self.resume = None;
            trace!("Seeking to chunk {chunk} at {} for offset {offset}", self.offsets[chunk]);
            self.stream.reset_to(self.offsets[chunk])?;
            if !self.skip(offset - chunk as u64 * chunk_size)? {
                return Ok(0);
            }
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read_inflated(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if filled == 0 => {
                    self.resume = None;
                    return Err(e);
                }
                Err(e) => {
                    // Report what was decoded; the next read starts over and
                    // hits the error again.
                    debug!("Short read at {}: {e}", offset + filled as u64);
                    self.resume = None;
                    return Ok(filled);
                }
            }
        }
        self.resume = Some((chunk, offset + filled as u64));
        Ok(filled)
    }

    /// Decode and drop `count` bytes. Returns `false` if the stream ended
    /// first.
    fn skip(&mut self, mut count: u64) -> Result<bool> {
        let mut scratch = [0u8; SKIP_BUFFER_SIZE];
        while count > 0 {
            let want = count.min(SKIP_BUFFER_SIZE as u64) as usize;
            let n = self.stream.read_inflated(&mut scratch[..want])?;
            if n == 0 {
                return Ok(false);
            }
            count -= n as u64;
        }
        Ok(true)
    }

    /// Move the cursor without doing any I/O. Returns the new position.
    ///
    /// # Errors
    /// - `NegativeOffset` if the result would be before the start; the
    ///   cursor is left unchanged
    /// - `UnsupportedSeek` for [`Whence::End`]
    pub fn seek_from(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let target = match whence {
            Whence::Start => i128::from(offset),
            Whence::Current => i128::from(self.cursor) + i128::from(offset),
            Whence::End => return Err(DictzipError::UnsupportedSeek),
        };
        self.reposition(target)
    }

    fn reposition(&mut self, target: i128) -> Result<u64> {
        if target < 0 {
            return Err(DictzipError::NegativeOffset { offset: target });
        }
        self.cursor = u64::try_from(target).map_err(|_| DictzipError::Io {
            context: "seeking",
            source: io::Error::new(io::ErrorKind::InvalidInput, "offset overflows u64"),
        })?;
        Ok(self.cursor)
    }

    /// Decompress the whole archive and compare it against the CRC-32 and
    /// ISIZE stored in the trailer.
    ///
    /// # Errors
    /// - `TrailerMismatch` if either value differs
    /// - `Deflate` or `Io` if the data is corrupt or the source fails
    pub fn verify_trailer(&mut self) -> Result<()> {
        self.resume = None;
        self.stream.reset_to(self.offsets[0])?;

        let mut digest = Hasher::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.stream.read_inflated(&mut buf)?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            total += n as u64;
        }

        let expected_chunks = total.div_ceil(u64::from(self.header.chunk_size));
        if expected_chunks != self.header.sizes.len() as u64 {
            warn!(
                "Chunk table lists {} chunks but the data fills {}",
                self.header.sizes.len(),
                expected_chunks
            );
        }

        let trailer_pos = self.stream.compressed_position();
        trace!("Trailer at compressed offset {trailer_pos}");
        let source = self.stream.get_mut();
        source.seek(SeekFrom::Start(trailer_pos)).context("seeking to trailer")?;
        let mut trailer = [0u8; TRAILER_LEN];
        source.read_exact(&mut trailer).context("reading trailer")?;

        let expected_crc = LittleEndian::read_u32(&trailer[..4]);
        let expected_size = LittleEndian::read_u32(&trailer[4..]);
        let actual_crc = digest.finalize();
        // ISIZE is the length modulo 2^32.
        let actual_size = total as u32;
        if expected_crc != actual_crc || expected_size != actual_size {
            return Err(DictzipError::TrailerMismatch {
                expected_crc,
                actual_crc,
                expected_size,
                actual_size,
            });
        }
        info!("Trailer verified: crc={actual_crc:#010x}, {total} bytes");
        Ok(())
    }

    /// Release the decoder and hand back the source, untouched apart from
    /// its position.
    pub fn close(self) -> R {
        info!("Closing dictzip reader");
        self.into_inner()
    }

    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }
}

impl<R: Read + Seek> Read for DictzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.cursor)?;
        self.cursor += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for DictzipReader<R> {
    /// Same rules as [`DictzipReader::seek_from`]; `SeekFrom::End` always
    /// fails.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.cursor) + i128::from(delta),
            SeekFrom::End(_) => return Err(DictzipError::UnsupportedSeek.into()),
        };
        Ok(self.reposition(target)?)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.cursor)
    }
}
