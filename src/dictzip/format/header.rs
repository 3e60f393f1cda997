//! gzip header parsing and encoding for dictzip archives.
//!
//! This module handles:
//! - Validating the fixed 10-byte lead-in (magic, method, flags)
//! - Decoding MTIME and OS, skipping the advisory XFL
//! - Delegating the EXTRA field to [`extra`](super::extra)
//! - Reading the optional NAME, COMMENT and header CRC-16
//! - Building the same layout when writing

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::DateTime;
use crc32fast::Hasher;
use log::{debug, info, trace};

use crate::dictzip::format::extra;
use crate::dictzip::types::error::{DictzipError, HeaderError, Result};
use crate::dictzip::types::models::{DictzipHeader, ExtraFlags, Metadata, OperatingSystem};
use crate::dictzip::utils;
use crate::dictzip::MAX_STRING_LEN;

/// gzip ID1, ID2.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// CM value for deflate, the only method gzip defines.
pub const METHOD_DEFLATE: u8 = 8;

// FLG bits. FTEXT (bit 0) and the reserved bits 5-7 are ignored.
pub const FLAG_HCRC: u8 = 1 << 1;
pub const FLAG_EXTRA: u8 = 1 << 2;
pub const FLAG_NAME: u8 = 1 << 3;
pub const FLAG_COMMENT: u8 = 1 << 4;

/// Length of the fixed part of the header.
const LEAD_IN_LEN: usize = 10;

/// Reader adapter that keeps the running header CRC-32 and byte count.
struct HeaderReader<'a, R> {
    inner: &'a mut R,
    digest: Hasher,
    consumed: u64,
}

impl<'a, R: Read> HeaderReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self { inner, digest: Hasher::new(), consumed: 0 }
    }

    /// Low 16 bits of the CRC-32 over everything read so far.
    fn crc16(&self) -> u16 {
        (self.digest.clone().finalize() & 0xFFFF) as u16
    }
}

impl<R: Read> Read for HeaderReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Parses a dictzip header from the current position of `source`.
///
/// # Header Structure
/// ```text
/// [10 bytes] ID1 ID2 CM FLG MTIME(4) XFL OS
/// [2+XLEN  ] EXTRA, must contain the RA subfield
/// [NAME    ] NUL-terminated Latin-1, if FNAME
/// [COMMENT ] NUL-terminated Latin-1, if FCOMMENT
/// [2 bytes ] CRC-16 of all preceding header bytes, if FHCRC
/// ```
///
/// The returned `header_len` counts every byte consumed, so it is the
/// position of the first chunk when `source` started at offset 0.
pub fn parse<R: Read>(source: &mut R) -> Result<DictzipHeader> {
    let mut reader = HeaderReader::new(source);

    let mut lead_in = [0u8; LEAD_IN_LEN];
    utils::read_header_bytes(&mut reader, &mut lead_in, "reading header")?;

    let magic = [lead_in[0], lead_in[1]];
    if magic != GZIP_MAGIC {
        return Err(HeaderError::InvalidMagic(magic).into());
    }
    if lead_in[2] != METHOD_DEFLATE {
        return Err(HeaderError::UnsupportedMethod(lead_in[2]).into());
    }
    let flags = lead_in[3];
    let mtime = u32::from_le_bytes([lead_in[4], lead_in[5], lead_in[6], lead_in[7]]);
    let os = OperatingSystem::from(lead_in[9]);
    trace!("FLG={:#04x} MTIME={} XFL={:#04x} OS={}", flags, mtime, lead_in[8], os);

    if flags & FLAG_EXTRA == 0 {
        return Err(HeaderError::MissingExtraField.into());
    }
    let xlen = reader
        .read_u16::<LittleEndian>()
        .map_err(|e| utils::header_io_error(e, "reading EXTRA XLEN"))?;
    let mut raw_extra = vec![0u8; usize::from(xlen)];
    utils::read_header_bytes(&mut reader, &mut raw_extra, "reading EXTRA")?;
    let decoded = extra::decode(&raw_extra)?;

    let name = if flags & FLAG_NAME != 0 {
        Some(read_string(&mut reader, "reading NAME")?)
    } else {
        None
    };
    let comment = if flags & FLAG_COMMENT != 0 {
        Some(read_string(&mut reader, "reading COMMENT")?)
    } else {
        None
    };

    if flags & FLAG_HCRC != 0 {
        let actual = reader.crc16();
        let expected = reader
            .read_u16::<LittleEndian>()
            .map_err(|e| utils::header_io_error(e, "reading header CRC-16"))?;
        if expected != actual {
            return Err(HeaderError::BadHeaderCrc { expected, actual }.into());
        }
        debug!("Header CRC-16 verified: {:#06x}", actual);
    }

    // MTIME 0 means the modification time is not set.
    let mod_time = if mtime == 0 {
        None
    } else {
        DateTime::from_timestamp(i64::from(mtime), 0)
    };

    let header = DictzipHeader {
        metadata: Metadata {
            name,
            comment,
            mod_time,
            os,
            extra: decoded.user_extra,
        },
        chunk_size: decoded.table.chunk_size,
        sizes: decoded.table.sizes,
        header_len: reader.consumed,
    };

    info!(
        "Header parsed: chunk_size={}, chunks={}, header_len={}, name={:?}",
        header.chunk_size,
        header.sizes.len(),
        header.header_len,
        header.metadata.name
    );
    Ok(header)
}

/// Reads a NUL-terminated Latin-1 string of at most `MAX_STRING_LEN` bytes
/// including the terminator.
fn read_string<R: Read>(reader: &mut HeaderReader<'_, R>, context: &'static str) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        if bytes.len() >= MAX_STRING_LEN {
            return Err(HeaderError::StringTooLong { limit: MAX_STRING_LEN }.into());
        }
        let b = reader.read_u8().map_err(|e| utils::header_io_error(e, context))?;
        if b == 0 {
            return Ok(utils::decode_latin1(&bytes));
        }
        bytes.push(b);
    }
}

/// Encodes the complete header for a finished archive.
///
/// Fails if any field does not fit the format: a string that is not Latin-1
/// or is too long, malformed user EXTRA bytes, a chunk table larger than
/// XLEN allows, or a modification time past 2106.
pub fn encode(
    metadata: &Metadata,
    chunk_size: u16,
    sizes: &[u16],
    xfl: ExtraFlags,
    header_crc: bool,
) -> Result<Vec<u8>> {
    extra::validate_user_extra(&metadata.extra)?;
    let extra_field = extra::encode(chunk_size, sizes, &metadata.extra)?;
    let name = metadata
        .name
        .as_deref()
        .map(|s| utils::encode_latin1(s, MAX_STRING_LEN))
        .transpose()?;
    let comment = metadata
        .comment
        .as_deref()
        .map(|s| utils::encode_latin1(s, MAX_STRING_LEN))
        .transpose()?;

    let mut flags = FLAG_EXTRA;
    if name.is_some() {
        flags |= FLAG_NAME;
    }
    if comment.is_some() {
        flags |= FLAG_COMMENT;
    }
    if header_crc {
        flags |= FLAG_HCRC;
    }

    let mut out = Vec::with_capacity(LEAD_IN_LEN + extra_field.len() + 2);
    out.extend_from_slice(&GZIP_MAGIC);
    out.push(METHOD_DEFLATE);
    out.push(flags);
    out.extend_from_slice(&encode_mtime(metadata)?.to_le_bytes());
    out.push(xfl as u8);
    out.push(u8::from(metadata.os));
    out.extend_from_slice(&extra_field);
    if let Some(name) = name {
        out.extend_from_slice(&name);
    }
    if let Some(comment) = comment {
        out.extend_from_slice(&comment);
    }
    if header_crc {
        let crc16 = (crc32fast::hash(&out) & 0xFFFF) as u16;
        out.extend_from_slice(&crc16.to_le_bytes());
    }
    Ok(out)
}

/// MTIME as stored on disk. Times at or before the epoch cannot be told
/// apart from "unset" and are written as 0.
fn encode_mtime(metadata: &Metadata) -> Result<u32> {
    let Some(mod_time) = metadata.mod_time else {
        return Ok(0);
    };
    let secs = mod_time.timestamp();
    if secs <= 0 {
        return Ok(0);
    }
    u32::try_from(secs).map_err(|_| {
        DictzipError::from(HeaderError::FieldTooLarge { field: "MTIME", value: secs as u64 })
    })
}
