//! End of central directory location, including the Zip64 records.
//!
//! The end record sits at the tail of the archive, after an optional comment
//! of up to 65535 bytes, so it is found by scanning backward. A small window
//! is tried first since most archives carry no comment.

use tracing::{debug, trace};

use crate::formats::region::ByteRegion;
use crate::formats::zip::types::*;
use crate::io::error::IoError;
use crate::io::ByteSource;

/// Position of the last plausible end-record signature in `block`.
///
/// A candidate counts only if its declared comment fits in the block.
pub fn find_signature_in_block(block: &[u8]) -> Option<usize> {
    let last = block.len().checked_sub(EOCD_SIZE)?;
    (0..=last).rev().find(|&i| {
        block[i..i + 4] == EOCD_SIGNATURE && {
            let comment_len = u16::from_le_bytes([block[i + 20], block[i + 21]]) as usize;
            i + EOCD_SIZE + comment_len <= block.len()
        }
    })
}

/// Locate and decode the end record, following Zip64 records when needed.
pub fn read_directory_end<S: ByteSource + ?Sized>(source: &S) -> Result<ZipDirectoryEnd> {
    let size = source.size();

    for (pass, window) in EOCD_SEARCH_WINDOWS.iter().enumerate() {
        let len = (*window).min(size);
        let start = size - len;
        let block = source.read_vec_at(start, len as usize)?;

        if let Some(pos) = find_signature_in_block(&block) {
            let offset = start + pos as u64;
            trace!(pass, offset, "Found end of central directory");
            return decode_directory_end(source, &block[pos..], offset);
        }
        if len == size {
            break;
        }
    }

    Err(ZipError::EndRecordNotFound)
}

fn decode_directory_end<S: ByteSource + ?Sized>(
    source: &S,
    record: &[u8],
    offset: u64,
) -> Result<ZipDirectoryEnd> {
    let r = ByteRegion::new(record);
    let records_this_disk: u16 = r.read_at(8)?;
    let records: u16 = r.read_at(10)?;
    let directory_size: u32 = r.read_at(12)?;
    let directory_offset: u32 = r.read_at(16)?;
    let comment_len: u16 = r.read_at(20)?;
    let comment = r.substring(EOCD_SIZE, comment_len as usize)?;

    let mut end = ZipDirectoryEnd {
        disk_number: r.read_at::<u16>(4)? as u32,
        directory_disk: r.read_at::<u16>(6)? as u32,
        records_this_disk: records_this_disk as u64,
        records: records as u64,
        directory_size: directory_size as u64,
        directory_offset: directory_offset as u64,
        comment: String::from_utf8_lossy(comment).into_owned(),
        offset,
        zip64_offset: None,
    };

    if records == SENTINEL_U16 || directory_size == SENTINEL_U32 || directory_offset == SENTINEL_U32
    {
        let zip64_offset = find_zip64_end(source, offset)?;
        read_zip64_end(source, zip64_offset, &mut end)?;
    }

    debug!(
        records = end.records,
        directory_offset = end.directory_offset,
        directory_size = end.directory_size,
        zip64 = end.is_zip64(),
        "Decoded end of central directory"
    );
    Ok(end)
}

/// Read the Zip64 locator that must sit right before the end record.
fn find_zip64_end<S: ByteSource + ?Sized>(source: &S, end_offset: u64) -> Result<u64> {
    let locator_offset = end_offset
        .checked_sub(ZIP64_LOCATOR_SIZE as u64)
        .ok_or(ZipError::MissingZip64Locator)?;
    let raw = source.read_vec_at(locator_offset, ZIP64_LOCATOR_SIZE)?;
    let r = ByteRegion::new(&raw);

    if r.read_at::<u32>(0)? != ZIP64_LOCATOR_SIGNATURE {
        return Err(ZipError::MissingZip64Locator);
    }
    if r.read_at::<u32>(4)? != 0 {
        return Err(ZipError::InvalidZip64Locator("end record is not on disk 0"));
    }
    let zip64_offset: u64 = r.read_at(8)?;
    if r.read_at::<u32>(16)? != 1 {
        return Err(ZipError::InvalidZip64Locator("multi-disk archives are not supported"));
    }
    Ok(zip64_offset)
}

/// Decode the 56-byte Zip64 end record; its values replace the sentinels.
fn read_zip64_end<S: ByteSource + ?Sized>(
    source: &S,
    offset: u64,
    end: &mut ZipDirectoryEnd,
) -> Result<()> {
    let raw = source
        .read_vec_at(offset, ZIP64_EOCD_SIZE)
        .map_err(|e| match e {
            IoError::UnexpectedEof { .. } => ZipError::InvalidZip64End { offset },
            other => other.into(),
        })?;
    let r = ByteRegion::new(&raw);
    if r.read_at::<u32>(0)? != ZIP64_EOCD_SIGNATURE {
        return Err(ZipError::InvalidZip64End { offset });
    }

    end.disk_number = r.read_at(16)?;
    end.directory_disk = r.read_at(20)?;
    end.records_this_disk = r.read_at(24)?;
    end.records = r.read_at(32)?;
    end.directory_size = r.read_at(40)?;
    end.directory_offset = r.read_at(48)?;
    end.zip64_offset = Some(offset);
    Ok(())
}
