//! Low-level byte and string utilities

use std::io::{self, Read};

use super::types::error::{DictzipError, HeaderError, Result};

/// Read exactly `buf.len()` bytes while parsing the header.
///
/// Running out of input is reported as `Truncated` rather than as a plain
/// I/O error, since a header can never legitimately end early.
pub fn read_header_bytes(reader: &mut impl Read, buf: &mut [u8], context: &'static str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| header_io_error(e, context))
}

/// Map an I/O error raised during header parsing.
pub fn header_io_error(err: io::Error, context: &'static str) -> DictzipError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DictzipError::Truncated { context }
    } else {
        DictzipError::Io { context, source: err }
    }
}

/// Decode ISO 8859-1 bytes: every byte is the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode a string as ISO 8859-1 followed by a NUL terminator.
///
/// `limit` bounds the encoded length including the terminator.
pub fn encode_latin1(s: &str, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() + 1);
    for c in s.chars() {
        let code = u32::from(c);
        if code == 0 || code > 0xFF {
            return Err(HeaderError::InvalidString.into());
        }
        out.push(code as u8);
    }
    out.push(0);
    if out.len() > limit {
        return Err(HeaderError::StringTooLong { limit }.into());
    }
    Ok(out)
}
