//! Core data structures for dictzip headers.
//!
//! This module defines the fundamental types shared by the reader and the
//! writer:
//! - The gzip OS and XFL enumerations
//! - The caller-visible header fields (`Metadata`)
//! - The parsed on-disk header of an archive (`DictzipHeader`)

use chrono::{DateTime, Utc};
use flate2::Compression;

/// The gzip OS byte: the file system on which the archive was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperatingSystem {
    /// FAT file system (MS-DOS, OS/2, NT/Win32).
    Fat,
    Amiga,
    /// VMS or OpenVMS.
    Vms,
    Unix,
    /// VM/CMS.
    Vm,
    /// Atari TOS.
    Atari,
    /// HPFS file system (OS/2, NT).
    Hpfs,
    Macintosh,
    ZSystem,
    Cpm,
    Tops20,
    /// NTFS file system (NT).
    Ntfs,
    Qdos,
    /// Acorn RISCOS.
    Acorn,
    #[default]
    Unknown,
    /// A value outside the RFC 1952 table, kept so it round-trips.
    Other(u8),
}

impl From<u8> for OperatingSystem {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Fat,
            1 => Self::Amiga,
            2 => Self::Vms,
            3 => Self::Unix,
            4 => Self::Vm,
            5 => Self::Atari,
            6 => Self::Hpfs,
            7 => Self::Macintosh,
            8 => Self::ZSystem,
            9 => Self::Cpm,
            10 => Self::Tops20,
            11 => Self::Ntfs,
            12 => Self::Qdos,
            13 => Self::Acorn,
            255 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

impl From<OperatingSystem> for u8 {
    fn from(os: OperatingSystem) -> Self {
        match os {
            OperatingSystem::Fat => 0,
            OperatingSystem::Amiga => 1,
            OperatingSystem::Vms => 2,
            OperatingSystem::Unix => 3,
            OperatingSystem::Vm => 4,
            OperatingSystem::Atari => 5,
            OperatingSystem::Hpfs => 6,
            OperatingSystem::Macintosh => 7,
            OperatingSystem::ZSystem => 8,
            OperatingSystem::Cpm => 9,
            OperatingSystem::Tops20 => 10,
            OperatingSystem::Ntfs => 11,
            OperatingSystem::Qdos => 12,
            OperatingSystem::Acorn => 13,
            OperatingSystem::Unknown => 255,
            OperatingSystem::Other(value) => value,
        }
    }
}

impl std::fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OperatingSystem::Fat => write!(f, "FAT"),
            OperatingSystem::Amiga => write!(f, "Amiga"),
            OperatingSystem::Vms => write!(f, "VMS"),
            OperatingSystem::Unix => write!(f, "Unix"),
            OperatingSystem::Vm => write!(f, "VM/CMS"),
            OperatingSystem::Atari => write!(f, "Atari TOS"),
            OperatingSystem::Hpfs => write!(f, "HPFS"),
            OperatingSystem::Macintosh => write!(f, "Macintosh"),
            OperatingSystem::ZSystem => write!(f, "Z-System"),
            OperatingSystem::Cpm => write!(f, "CP/M"),
            OperatingSystem::Tops20 => write!(f, "TOPS-20"),
            OperatingSystem::Ntfs => write!(f, "NTFS"),
            OperatingSystem::Qdos => write!(f, "QDOS"),
            OperatingSystem::Acorn => write!(f, "Acorn RISCOS"),
            OperatingSystem::Unknown => write!(f, "unknown"),
            OperatingSystem::Other(value) => write!(f, "os {}", value),
        }
    }
}

/// The gzip XFL byte. Advisory only; ignored when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFlags {
    None = 0,
    /// The compressor used maximum compression (slowest algorithm).
    Slowest = 2,
    /// The compressor used the fastest algorithm.
    Fastest = 4,
}

impl From<Compression> for ExtraFlags {
    fn from(level: Compression) -> Self {
        match level.level() {
            9 => Self::Slowest,
            1 => Self::Fastest,
            _ => Self::None,
        }
    }
}

/// Header fields chosen by whoever wrote the archive.
///
/// Strings may only contain the code points U+0001 through U+00FF since they
/// are stored as NUL-terminated ISO 8859-1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The NAME field: original file name.
    pub name: Option<String>,
    /// The COMMENT field.
    pub comment: Option<String>,
    /// The MTIME field. The on-disk value 0 means "not set" and reads back as `None`.
    pub mod_time: Option<DateTime<Utc>>,
    pub os: OperatingSystem,
    /// All EXTRA subfields except the dictzip RA subfield, verbatim
    /// (`SI1 SI2 LEN payload` repeated).
    pub extra: Vec<u8>,
}

/// Complete parsed header of a dictzip archive.
///
/// Describes the file as found on disk; the reader never changes it after
/// parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictzipHeader {
    pub metadata: Metadata,
    /// Uncompressed size of every chunk except possibly the last.
    pub chunk_size: u16,
    /// Compressed size of each chunk, in file order.
    pub sizes: Vec<u16>,
    /// Total number of header bytes; the first chunk starts here.
    pub header_len: u64,
}

impl DictzipHeader {
    /// Absolute positions of each chunk's compressed data.
    ///
    /// Has one more entry than `sizes`; the last entry is where the deflate
    /// end marker and trailer begin.
    pub fn offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.sizes.len() + 1);
        let mut position = self.header_len;
        offsets.push(position);
        for &size in &self.sizes {
            position += u64::from(size);
            offsets.push(position);
        }
        offsets
    }
}
