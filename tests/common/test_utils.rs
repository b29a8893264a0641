//! Shared test utilities for file-backed sources.

use binmeta::io::{IOLimits, MappedFile};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Creates a temporary file with the given content.
///
/// The file is removed when the returned `NamedTempFile` is dropped.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Maps a file with default limits, panicking on failure.
pub fn open_mapped<P: AsRef<Path>>(path: P) -> MappedFile {
    MappedFile::open(path, IOLimits::default()).unwrap()
}

/// Maps a file with a read budget of `max_read_bytes`.
pub fn open_mapped_with_budget<P: AsRef<Path>>(path: P, max_read_bytes: u64) -> MappedFile {
    let limits = IOLimits {
        max_read_bytes,
        ..IOLimits::default()
    };
    MappedFile::open(path, limits).unwrap()
}
