//! ZIP central directory decoder.
//!
//! [`ZipArchive`] locates the end record, follows Zip64 records where the
//! classic fields saturate, and decodes every central directory entry. Entry
//! data is never decompressed; only its location is reported.

use std::io::BufReader;

use tracing::{debug, warn};

pub mod directory_end;
pub mod entry;
pub mod types;

use crate::config::ZipOptions;
use crate::formats::region::ByteRegion;
use crate::io::error::IoError;
use crate::io::{ByteSource, SourceReader};
use directory_end::read_directory_end;
use entry::read_entry;
pub use types::*;

/// A decoded ZIP central directory.
pub struct ZipArchive<S: ByteSource> {
    source: S,
    size: u64,
    end: ZipDirectoryEnd,
    entries: Vec<ZipFileEntry>,
    compressed_size: u64,
    uncompressed_size: u64,
}

impl<S: ByteSource> ZipArchive<S> {
    pub fn open(source: S) -> Result<Self> {
        Self::with_options(source, &ZipOptions::default())
    }

    /// Decode the central directory. The first bad entry aborts the decode.
    pub fn with_options(source: S, options: &ZipOptions) -> Result<Self> {
        let size = source.size();
        let end = read_directory_end(&source)?;

        // Every record needs at least a fixed central directory header.
        let minimum = end.records.saturating_mul(CDFH_SIZE as u64);
        if minimum > size {
            warn!(declared = end.records, size, "Entry count cannot fit in archive");
            return Err(ZipError::ImplausibleEntryCount {
                declared: end.records,
                size,
            });
        }
        if let Some(limit) = options.max_entries {
            if end.records > limit {
                return Err(ZipError::LimitExceeded {
                    what: "entries",
                    limit,
                    actual: end.records,
                });
            }
        }
        let directory_end = end.directory_offset.checked_add(end.directory_size);
        if !matches!(directory_end, Some(stop) if stop <= size) {
            return Err(ZipError::DirectoryOutOfBounds {
                offset: end.directory_offset,
                size,
            });
        }

        let mut reader = BufReader::new(SourceReader::new(&source, end.directory_offset));
        let mut entries = Vec::with_capacity(end.records as usize);
        let mut offset = end.directory_offset;
        let mut compressed_size = 0u64;
        let mut uncompressed_size = 0u64;

        for index in 0..end.records {
            let (entry, consumed) = read_entry(&mut reader, index, offset)?;
            offset += consumed;
            compressed_size = compressed_size.saturating_add(entry.compressed_size);
            uncompressed_size = uncompressed_size.saturating_add(entry.uncompressed_size);
            entries.push(entry);
        }
        drop(reader);

        debug!(
            entries = entries.len(),
            compressed_size,
            uncompressed_size,
            zip64 = end.is_zip64(),
            "Decoded central directory"
        );

        Ok(Self {
            source,
            size,
            end,
            entries,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Archive comment from the end record.
    pub fn comment(&self) -> &str {
        &self.end.comment
    }

    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// First entry with exactly this name.
    pub fn entry(&self, name: &str) -> Option<&ZipFileEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Sum of compressed sizes over all entries.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Sum of uncompressed sizes over all entries.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn directory_end(&self) -> &ZipDirectoryEnd {
        &self.end
    }

    pub fn is_zip64(&self) -> bool {
        self.end.is_zip64()
    }

    /// Offset of the entry's stored data, past its local file header.
    pub fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let offset = entry.header_offset;
        let raw = self
            .source
            .read_vec_at(offset, LFH_SIZE)
            .map_err(|e| match e {
                IoError::UnexpectedEof { .. } => ZipError::InvalidLocalHeader { offset },
                other => other.into(),
            })?;
        let r = ByteRegion::new(&raw);
        if r.read_at::<u32>(0)? != LFH_SIGNATURE {
            return Err(ZipError::InvalidLocalHeader { offset });
        }
        let name_len: u16 = r.read_at(26)?;
        let extra_len: u16 = r.read_at(28)?;
        Ok(offset + LFH_SIZE as u64 + name_len as u64 + extra_len as u64)
    }
}

impl<S: ByteSource> std::fmt::Debug for ZipArchive<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("size", &self.size)
            .field("entries", &self.entries.len())
            .field("zip64", &self.is_zip64())
            .finish()
    }
}
