//! ZIP record types, constants and errors

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::formats::region::BoundsError;
use crate::io::error::IoError;

pub const LFH_SIGNATURE: u32 = 0x0403_4b50; // PK\x03\x04
pub const CDFH_SIGNATURE: u32 = 0x0201_4b50; // PK\x01\x02
pub const EOCD_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50; // PK\x06\x07
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50; // PK\x06\x06

pub const LFH_SIZE: usize = 30;
pub const CDFH_SIZE: usize = 46;
pub const EOCD_SIZE: usize = 22;
pub const ZIP64_LOCATOR_SIZE: usize = 20;
pub const ZIP64_EOCD_SIZE: usize = 56;

/// Backward search windows for the end record, tried in order.
pub const EOCD_SEARCH_WINDOWS: [u64; 2] = [1024, 65 * 1024];

pub const SENTINEL_U16: u16 = 0xFFFF;
pub const SENTINEL_U32: u32 = 0xFFFF_FFFF;

// Extra field tags
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const NTFS_EXTRA_ID: u16 = 0x000a;
pub const UNIX_EXTRA_ID: u16 = 0x000d;
pub const EXT_TIME_EXTRA_ID: u16 = 0x5455;
pub const INFOZIP_UNIX_EXTRA_ID: u16 = 0x5855;
pub const WINZIP_AES_EXTRA_ID: u16 = 0x9901;

pub const METHOD_AES: u16 = 99;

#[derive(Error, Debug)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Truncated record: {0}")]
    Truncated(#[from] BoundsError),

    #[error("Not a valid ZIP file: end of central directory record not found")]
    EndRecordNotFound,

    #[error("End of central directory fields are sentinel but no Zip64 locator precedes it")]
    MissingZip64Locator,

    #[error("Invalid Zip64 end of central directory locator: {0}")]
    InvalidZip64Locator(&'static str),

    #[error("Invalid Zip64 end of central directory record at offset {offset:#x}")]
    InvalidZip64End { offset: u64 },

    #[error("Central directory declares {declared} entries, impossible in a {size} byte archive")]
    ImplausibleEntryCount { declared: u64, size: u64 },

    #[error("Central directory offset {offset:#x} lies outside a {size} byte archive")]
    DirectoryOutOfBounds { offset: u64, size: u64 },

    #[error("Entry {index}: bad central directory signature 0x{found:08x}")]
    InvalidEntrySignature { index: u64, found: u32 },

    #[error("Entry {index}: {field} is a Zip64 sentinel with no Zip64 value")]
    MissingZip64Field { index: u64, field: &'static str },

    #[error("Entry {index}: Zip64 extra field too short for {field}")]
    MalformedZip64Extra { index: u64, field: &'static str },

    #[error("Invalid local file header at offset {offset:#x}")]
    InvalidLocalHeader { offset: u64 },

    #[error("Limit exceeded: {what} is {actual} (limit {limit})")]
    LimitExceeded {
        what: &'static str,
        limit: u64,
        actual: u64,
    },
}

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => e.kind(),
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            _ => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, ZipError>;

bitflags! {
    /// General purpose bit flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct ZipFlags: u16 {
        const ENCRYPTED = 0x0001;
        const DATA_DESCRIPTOR = 0x0008;
        const STRONG_ENCRYPTION = 0x0040;
        const UTF8 = 0x0800;
    }
}

/// End of central directory, with Zip64 values folded in when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipDirectoryEnd {
    pub disk_number: u32,
    pub directory_disk: u32,
    pub records_this_disk: u64,
    pub records: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
    pub comment: String,
    /// File offset of the classic end record.
    pub offset: u64,
    /// File offset of the Zip64 end record, when one was used.
    pub zip64_offset: Option<u64>,
}

impl ZipDirectoryEnd {
    pub fn is_zip64(&self) -> bool {
        self.zip64_offset.is_some()
    }
}

/// WinZip AES parameters from extra field 0x9901.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AesInfo {
    /// 1 for AE-1, 2 for AE-2.
    pub version: u16,
    pub vendor: u16,
    /// 1, 2, 3 for 128, 192, 256-bit keys.
    pub strength: u8,
    /// The compression method hidden behind method 99.
    pub method: u16,
}

impl AesInfo {
    pub fn key_bits(&self) -> Option<u16> {
        match self.strength {
            1 => Some(128),
            2 => Some(192),
            3 => Some(256),
            _ => None,
        }
    }

    /// Display form such as `AES-256 (AE-2)`.
    pub fn text(&self) -> String {
        match self.key_bits() {
            Some(bits) => format!("AES-{bits} (AE-{})", self.version),
            None => format!("AES (AE-{})", self.version),
        }
    }
}

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipFileEntry {
    /// Name as stored, decoded lossily as UTF-8.
    pub name: String,
    pub comment: String,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: ZipFlags,
    /// Effective compression method; for AES entries, the real method.
    pub method: u16,
    /// Method field as written in the header (99 for AES entries).
    pub stored_method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    /// Extra-field modification time when present, otherwise the DOS stamp.
    pub modified: Option<DateTime<Utc>>,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    /// Offset of the local file header.
    pub header_offset: u64,
    #[serde(skip)]
    pub extra: Vec<u8>,
    pub aes: Option<AesInfo>,
}

impl ZipFileEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(ZipFlags::ENCRYPTED) || self.aes.is_some()
    }

    pub fn is_utf8(&self) -> bool {
        self.flags.contains(ZipFlags::UTF8)
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags.contains(ZipFlags::DATA_DESCRIPTOR)
    }

    /// Host system byte of "version made by" (0 FAT, 3 Unix, 11 NTFS, 19 macOS).
    pub fn creator_host(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    /// Unix permission bits, for archives created on Unix hosts.
    pub fn unix_mode(&self) -> Option<u32> {
        const CREATOR_UNIX: u8 = 3;
        const CREATOR_MACOSX: u8 = 19;
        matches!(self.creator_host(), CREATOR_UNIX | CREATOR_MACOSX)
            .then_some(self.external_attributes >> 16)
    }

    pub fn method_name(&self) -> &'static str {
        method_name(self.method)
    }

    pub fn aes_text(&self) -> Option<String> {
        self.aes.as_ref().map(AesInfo::text)
    }
}

/// Compression method names, keyed by method id.
pub const METHOD_NAMES: &[(u16, &str)] = &[
    (0, "store"),
    (1, "shrunk"),
    (2, "reduce-1"),
    (3, "reduce-2"),
    (4, "reduce-3"),
    (5, "reduce-4"),
    (6, "implode"),
    (8, "deflate"),
    (9, "deflate64"),
    (10, "pkware-implode"),
    (12, "bzip2"),
    (14, "lzma"),
    (18, "ibm-terse"),
    (19, "lz77"),
    (33, "lzma2"),
    (93, "zstd"),
    (95, "xz"),
    (96, "jpeg"),
    (97, "wavpack"),
    (98, "ppmd"),
    (99, "aes"),
];

/// Name of a compression method, `"unknown"` for ids outside the table.
pub fn method_name(method: u16) -> &'static str {
    METHOD_NAMES
        .iter()
        .find(|(id, _)| *id == method)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}
