//! Codec for the gzip EXTRA field and the dictzip RA subfield.
//!
//! # Layout
//! ```text
//! [2 bytes] XLEN (little-endian u16, bytes that follow)
//! subfields, repeated until XLEN is exhausted:
//!   [1 byte ] SI1
//!   [1 byte ] SI2
//!   [2 bytes] LEN (little-endian u16)
//!   [LEN    ] payload
//! ```
//!
//! The RA subfield (`SI1='R' SI2='A'`) carries the chunk table:
//! ```text
//! [2 bytes] VER   (= 1)
//! [2 bytes] CHLEN (uncompressed chunk size)
//! [2 bytes] CHCNT (number of chunks)
//! [CHCNT × 2 bytes] compressed size of each chunk
//! ```
//! All other subfields are passed through verbatim.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{trace, warn};

use crate::dictzip::types::error::{DictzipError, HeaderError, Result};
use crate::dictzip::utils;

/// Subfield id of the dictzip random access table.
pub const RA_ID: [u8; 2] = *b"RA";

/// The only RA version ever defined.
pub const RA_VERSION: u16 = 1;

/// Bytes of SI1, SI2 and LEN in front of each subfield payload.
const SUBFIELD_HEADER_LEN: usize = 4;

/// Bytes of VER, CHLEN and CHCNT at the start of the RA payload.
const RA_FIXED_LEN: usize = 6;

/// The decoded dictzip chunk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTable {
    pub chunk_size: u16,
    pub sizes: Vec<u16>,
}

/// The EXTRA field split into the chunk table and the remaining subfields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedExtra {
    pub table: ChunkTable,
    /// Non-RA subfields in encounter order, verbatim.
    pub user_extra: Vec<u8>,
}

/// One subfield borrowed from an EXTRA payload.
struct Subfield<'a> {
    id: [u8; 2],
    /// The subfield including its 4-byte header.
    raw: &'a [u8],
    payload: &'a [u8],
}

/// Split `data` into subfields, failing if a declared length overruns it.
fn split_subfields(mut data: &[u8]) -> Result<Vec<Subfield<'_>>> {
    let mut fields = Vec::new();
    while !data.is_empty() {
        if data.len() < SUBFIELD_HEADER_LEN {
            return Err(DictzipError::Truncated { context: "reading EXTRA subfield header" });
        }
        let len = usize::from(u16::from_le_bytes([data[2], data[3]]));
        let total = SUBFIELD_HEADER_LEN + len;
        if data.len() < total {
            return Err(DictzipError::Truncated { context: "reading EXTRA subfield payload" });
        }
        fields.push(Subfield {
            id: [data[0], data[1]],
            raw: &data[..total],
            payload: &data[SUBFIELD_HEADER_LEN..total],
        });
        data = &data[total..];
    }
    Ok(fields)
}

/// Decode the EXTRA payload (the bytes after XLEN).
pub fn decode(extra: &[u8]) -> Result<DecodedExtra> {
    let mut table = None;
    let mut user_extra = Vec::new();

    for field in split_subfields(extra)? {
        if field.id == RA_ID {
            if table.is_some() {
                warn!("EXTRA contains more than one RA subfield; using the last one");
            }
            table = Some(decode_ra(field.payload)?);
        } else {
            trace!(
                "Keeping EXTRA subfield {:?} ({} bytes)",
                String::from_utf8_lossy(&field.id),
                field.payload.len()
            );
            user_extra.extend_from_slice(field.raw);
        }
    }

    let table = table.ok_or(HeaderError::MissingRaField)?;
    Ok(DecodedExtra { table, user_extra })
}

/// Decode the RA subfield payload.
fn decode_ra(mut payload: &[u8]) -> Result<ChunkTable> {
    let truncated = |e| utils::header_io_error(e, "reading RA subfield");

    let version = payload.read_u16::<LittleEndian>().map_err(truncated)?;
    if version != RA_VERSION {
        return Err(HeaderError::UnsupportedVersion(version).into());
    }
    let chunk_size = payload.read_u16::<LittleEndian>().map_err(truncated)?;
    let count = payload.read_u16::<LittleEndian>().map_err(truncated)?;
    if chunk_size == 0 {
        return Err(DictzipError::InvalidChunkSize(chunk_size));
    }

    let mut sizes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        sizes.push(payload.read_u16::<LittleEndian>().map_err(truncated)?);
    }
    if !payload.is_empty() {
        warn!("RA subfield has {} trailing bytes after the chunk table", payload.len());
    }

    Ok(ChunkTable { chunk_size, sizes })
}

/// Check that caller supplied EXTRA bytes are well formed and do not contain
/// an RA subfield.
pub fn validate_user_extra(extra: &[u8]) -> Result<()> {
    let fields = split_subfields(extra).map_err(|_| {
        HeaderError::InvalidExtra("subfield length overruns the data".to_string())
    })?;
    if fields.iter().any(|f| f.id == RA_ID) {
        return Err(HeaderError::InvalidExtra("the RA subfield is reserved".to_string()).into());
    }
    Ok(())
}

/// Encode XLEN followed by the RA subfield and the user subfields.
pub fn encode(chunk_size: u16, sizes: &[u16], user_extra: &[u8]) -> Result<Vec<u8>> {
    let count = sizes.len();
    if count > usize::from(u16::MAX) {
        return Err(too_large("CHCNT", count));
    }
    let ra_len = RA_FIXED_LEN + 2 * count;
    if ra_len > usize::from(u16::MAX) {
        return Err(too_large("RA LEN", ra_len));
    }
    let xlen = SUBFIELD_HEADER_LEN + ra_len + user_extra.len();
    if xlen > usize::from(u16::MAX) {
        return Err(too_large("XLEN", xlen));
    }

    let mut out = Vec::with_capacity(2 + xlen);
    out.extend_from_slice(&(xlen as u16).to_le_bytes());
    out.extend_from_slice(&RA_ID);
    out.extend_from_slice(&(ra_len as u16).to_le_bytes());
    out.extend_from_slice(&RA_VERSION.to_le_bytes());
    out.extend_from_slice(&chunk_size.to_le_bytes());
    out.extend_from_slice(&(count as u16).to_le_bytes());
    for size in sizes {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out.extend_from_slice(user_extra);

    debug_assert_eq!(out.len(), 2 + xlen);
    Ok(out)
}

fn too_large(field: &'static str, value: usize) -> DictzipError {
    HeaderError::FieldTooLarge { field, value: value as u64 }.into()
}
