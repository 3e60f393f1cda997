use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use dictzip::{DictzipError, DictzipReader, HeaderError, OperatingSystem, Whence};

const FLAG_HCRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;

/// EXTRA field with an RA subfield for chunk size 58315 and no chunks.
const EMPTY_RA: [u8; 12] = [
    0x0A, 0x00, // XLEN
    b'R', b'A', 0x06, 0x00, // SI1 SI2 LEN
    0x01, 0x00, // VER
    0xCB, 0xE3, // CHLEN = 58315
    0x00, 0x00, // CHCNT
];

/// Final empty fixed block, a stray pad byte and an all-zero trailer.
const EMPTY_BODY: [u8; 11] = [0x03, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];

fn lead_in(flags: u8, mtime: [u8; 4], xfl: u8, os: u8) -> Vec<u8> {
    let mut data = vec![0x1F, 0x8B, 0x08, flags];
    data.extend_from_slice(&mtime);
    data.push(xfl);
    data.push(os);
    data
}

fn empty_file_with_name() -> Vec<u8> {
    let mut data = lead_in(FLAG_EXTRA | FLAG_NAME, [0; 4], 0x02, 0x03);
    data.extend_from_slice(&EMPTY_RA);
    data.extend_from_slice(b"empty.txt\0");
    data.extend_from_slice(&EMPTY_BODY);
    data
}

fn empty_file_with_crc(crc: [u8; 2]) -> Vec<u8> {
    let mut data = lead_in(FLAG_EXTRA | FLAG_HCRC, [0; 4], 0x02, 0x03);
    data.extend_from_slice(&EMPTY_RA);
    data.extend_from_slice(&crc);
    data.extend_from_slice(&EMPTY_BODY);
    data
}

/// "chunk1chunk2chunk3chunk4" in four chunks of 6 bytes.
fn multi_chunk() -> Vec<u8> {
    let mut data = lead_in(FLAG_EXTRA, [0; 4], 0x00, 0xFF);
    data.extend_from_slice(&[
        0x12, 0x00, // XLEN
        b'R', b'A', 0x0E, 0x00, // SI1 SI2 LEN
        0x01, 0x00, // VER
        0x06, 0x00, // CHLEN
        0x04, 0x00, // CHCNT
        0x0C, 0x00, 0x0C, 0x00, 0x0C, 0x00, 0x0C, 0x00, // sizes
    ]);
    for digit in [0x04, 0x02, 0x06, 0x01] {
        data.extend_from_slice(&[0x4A, 0xCE, 0x28, 0xCD, 0xCB, 0x36, digit, 0x00, 0x00, 0x00, 0xFF, 0xFF]);
    }
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0xFF, 0xFF]); // final block
    data.extend_from_slice(&[0x85, 0x42, 0x75, 0x46]); // CRC-32
    data.extend_from_slice(&[0x18, 0x00, 0x00, 0x00]); // ISIZE
    data
}

fn open(data: Vec<u8>) -> DictzipReader<Cursor<Vec<u8>>> {
    DictzipReader::new(Cursor::new(data)).expect("open archive")
}

fn read_all(reader: &mut DictzipReader<Cursor<Vec<u8>>>) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).expect("read archive");
    out
}

#[test]
fn reads_empty_file_with_name() {
    let mut reader = open(empty_file_with_name());
    assert_eq!(reader.name(), Some("empty.txt"));
    assert_eq!(reader.comment(), None);
    assert_eq!(reader.os(), OperatingSystem::Unix);
    assert_eq!(reader.mod_time(), None);
    assert_eq!(reader.chunk_size(), 58315);
    assert_eq!(reader.chunk_count(), 0);
    assert_eq!(reader.offsets(), &[32]);
    assert!(reader.extra().is_empty());
    assert!(read_all(&mut reader).is_empty());
}

#[test]
fn comment_and_mtime() {
    let mut data = lead_in(FLAG_EXTRA | FLAG_COMMENT, [0x67, 0x31, 0x2F, 0x67], 0x02, 0x03);
    data.extend_from_slice(&EMPTY_RA);
    data.extend_from_slice(b"fcomment.txt\0");
    data.extend_from_slice(&EMPTY_BODY);

    let reader = open(data);
    assert_eq!(reader.name(), None);
    assert_eq!(reader.comment(), Some("fcomment.txt"));
    assert_eq!(reader.mod_time().map(|t| t.timestamp()), Some(0x672F_3167));
    assert_eq!(reader.offsets(), &[35]);
}

#[test]
fn user_extra_is_preserved() {
    let mut data = lead_in(FLAG_EXTRA, [0; 4], 0x00, 0xFF);
    data.extend_from_slice(&[
        0x11, 0x00, // XLEN
        b'R', b'A', 0x06, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x00,
        b'A', b'Z', 0x03, 0x00, 0xAB, 0xCD, 0xEF,
    ]);
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0xFF, 0xFF]);
    data.extend_from_slice(&[0; 8]);

    let mut reader = open(data);
    assert_eq!(reader.extra(), &[b'A', b'Z', 0x03, 0x00, 0xAB, 0xCD, 0xEF]);
    assert_eq!(reader.os(), OperatingSystem::Unknown);
    assert_eq!(reader.chunk_size(), 65535);
    assert_eq!(reader.offsets(), &[29]);
    assert!(read_all(&mut reader).is_empty());
}

#[test]
fn header_crc_is_checked() {
    let reader = open(empty_file_with_crc([0x99, 0xF4]));
    assert_eq!(reader.header().header_len, 24);
    assert_eq!(reader.offsets(), &[24]);
}

#[test]
fn bad_header_crc_fails_open() {
    let err = DictzipReader::new(Cursor::new(empty_file_with_crc([0x00, 0x00]))).err();
    assert!(matches!(
        err,
        Some(DictzipError::Header(HeaderError::BadHeaderCrc { expected: 0, actual: 0xF499 }))
    ));
}

#[test]
fn multi_chunk_table() {
    let mut reader = open(multi_chunk());
    assert_eq!(reader.chunk_size(), 6);
    assert_eq!(reader.sizes(), &[12, 12, 12, 12]);
    assert_eq!(reader.offsets(), &[30, 42, 54, 66, 78]);
    assert_eq!(read_all(&mut reader), b"chunk1chunk2chunk3chunk4");
}

#[test]
fn sequential_reads_cross_chunk_boundaries() {
    let mut reader = open(multi_chunk());
    assert_eq!(reader.position(), 0);

    let mut buf = [0u8; 9];
    assert_eq!(reader.read(&mut buf).expect("read"), 9);
    assert_eq!(&buf, b"chunk1chu");
    assert_eq!(reader.position(), 9);

    let mut buf = [0u8; 5];
    assert_eq!(reader.read(&mut buf).expect("read"), 5);
    assert_eq!(&buf, b"nk2ch");
    assert_eq!(reader.position(), 14);
}

#[test]
fn read_at_leaves_cursor_alone() {
    let mut reader = open(multi_chunk());
    let mut buf = [0u8; 8];
    assert_eq!(reader.read_at(&mut buf, 16).expect("read_at"), 8);
    assert_eq!(&buf, b"k3chunk4");
    assert_eq!(reader.position(), 0);

    // Short read at the end of the data, then end of stream.
    let mut buf = [0u8; 10];
    assert_eq!(reader.read_at(&mut buf, 20).expect("read_at"), 4);
    assert_eq!(&buf[..4], b"unk4");
    assert_eq!(reader.read_at(&mut buf, 24).expect("read_at"), 0);
    assert_eq!(reader.read_at(&mut buf, 1_000).expect("read_at"), 0);
}

#[test]
fn read_at_does_not_depend_on_previous_reads() {
    let mut reader = open(multi_chunk());
    let mut first = [0u8; 4];
    let mut again = [0u8; 4];
    reader.read_at(&mut first, 7).expect("read_at");
    reader.read_at(&mut [0u8; 3], 19).expect("read_at");
    reader.read_at(&mut again, 7).expect("read_at");
    assert_eq!(first, again);
    assert_eq!(&first, b"hunk");
}

#[test]
fn seek_moves_cursor() {
    let mut reader = open(multi_chunk());
    assert_eq!(reader.seek_from(25, Whence::Start).expect("seek"), 25);
    assert_eq!(reader.seek_from(-12, Whence::Current).expect("seek"), 13);
    assert_eq!(reader.seek_from(4, Whence::Current).expect("seek"), 17);

    let mut buf = [0u8; 3];
    reader.read_exact(&mut buf).expect("read");
    assert_eq!(&buf, b"3ch");

    assert_eq!(reader.seek(SeekFrom::Start(6)).expect("seek"), 6);
    assert_eq!(reader.stream_position().expect("position"), 6);
}

#[test]
fn seek_to_negative_offset_fails() {
    let mut reader = open(multi_chunk());
    for whence in [Whence::Start, Whence::Current] {
        let err = reader.seek_from(-25, whence).unwrap_err();
        assert!(matches!(err, DictzipError::NegativeOffset { offset: -25 }));
        assert_eq!(reader.position(), 0);
    }

    let err = reader.seek(SeekFrom::Current(-1)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(reader.position(), 0);
}

#[test]
fn seek_from_end_is_unsupported() {
    let mut reader = open(multi_chunk());
    assert!(matches!(reader.seek_from(0, Whence::End), Err(DictzipError::UnsupportedSeek)));
    let err = reader.seek(SeekFrom::End(0)).unwrap_err();
    assert!(matches!(
        err.get_ref().and_then(|e| e.downcast_ref::<DictzipError>()),
        Some(DictzipError::UnsupportedSeek)
    ));
}

#[test]
fn seek_past_end_reads_nothing() {
    let mut reader = open(multi_chunk());
    reader.seek(SeekFrom::Start(100)).expect("seek");
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).expect("read"), 0);
}

#[test]
fn trailer_verification() {
    let mut reader = open(multi_chunk());
    reader.verify_trailer().expect("trailer matches");

    let mut corrupt = multi_chunk();
    let crc_at = corrupt.len() - 8;
    corrupt[crc_at] ^= 0xFF;
    let err = open(corrupt).verify_trailer().unwrap_err();
    assert!(matches!(
        err,
        DictzipError::TrailerMismatch { actual_crc: 0x4675_4285, expected_size: 24, actual_size: 24, .. }
    ));
}

#[test]
fn truncated_header_is_distinguished() {
    let mut data = empty_file_with_name();
    data.truncate(25);
    let err = DictzipReader::new(Cursor::new(data)).err();
    assert!(matches!(err, Some(DictzipError::Truncated { .. })));
}

#[test]
fn missing_extra_field_is_rejected() {
    let mut data = lead_in(0, [0; 4], 0, 0xFF);
    data.extend_from_slice(&[0x03, 0x00]);
    let err = DictzipReader::new(Cursor::new(data)).err();
    assert!(matches!(err, Some(DictzipError::Header(HeaderError::MissingExtraField))));
}

#[test]
fn corrupt_chunk_data_is_an_error() {
    let mut data = multi_chunk();
    // First byte of chunk 2: BFINAL=1, BTYPE=11 is reserved.
    data[42] = 0xFF;
    let mut reader = open(data);

    let mut buf = [0u8; 6];
    assert_eq!(reader.read_at(&mut buf, 0).expect("chunk 1 is intact"), 6);
    let err = reader.read_at(&mut buf, 6).unwrap_err();
    assert!(matches!(err, DictzipError::Deflate(_)));
}

#[test]
fn open_file_and_close_returns_source() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&multi_chunk()).expect("write fixture");
    file.flush().expect("flush fixture");

    let mut reader = DictzipReader::open(file.path()).expect("open");
    let mut buf = [0u8; 6];
    assert_eq!(reader.read_at(&mut buf, 12).expect("read_at"), 6);
    assert_eq!(&buf, b"chunk3");

    let mut source = reader.close();
    let mut raw = Vec::new();
    source.seek(SeekFrom::Start(0)).expect("rewind");
    source.read_to_end(&mut raw).expect("source still usable");
    assert_eq!(raw, multi_chunk());
}
