//! Central directory file headers and their extra fields.

use std::io::Read;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{trace, warn};

use crate::formats::region::ByteRegion;
use crate::formats::zip::types::*;
use crate::io::error::IoError;

/// 100ns ticks per second in a Windows FILETIME.
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;
/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH_DELTA: i64 = 11_644_473_600;

/// Header fields still holding `0xFFFFFFFF`, waiting for a Zip64 value.
#[derive(Debug, Clone, Copy, Default)]
struct Zip64Pending {
    uncompressed: bool,
    compressed: bool,
    offset: bool,
}

/// Decode a DOS date/time pair; `None` for impossible dates.
pub fn dos_datetime(date: u16, time: u16) -> Option<DateTime<Utc>> {
    let day = NaiveDate::from_ymd_opt(
        1980 + (date >> 9) as i32,
        ((date >> 5) & 0xF) as u32,
        (date & 0x1F) as u32,
    )?;
    let stamp = day.and_hms_opt(
        (time >> 11) as u32,
        ((time >> 5) & 0x3F) as u32,
        ((time & 0x1F) * 2) as u32,
    )?;
    Some(Utc.from_utc_datetime(&stamp))
}

/// Convert a Windows FILETIME to UTC.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let secs = (filetime / FILETIME_TICKS_PER_SECOND) as i64 - FILETIME_UNIX_EPOCH_DELTA;
    let nanos = ((filetime % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn unix_seconds(secs: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
}

/// Fill `buf` from the directory stream, reporting how much arrived on EOF.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut got = 0usize;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(ZipError::Io(IoError::UnexpectedEof {
                    offset,
                    wanted: buf.len(),
                    got,
                }))
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ZipError::Io(IoError::StdIo(e))),
        }
    }
    Ok(())
}

/// Read one central directory record at absolute `offset`.
///
/// Returns the entry and the number of bytes it occupied.
pub fn read_entry<R: Read>(reader: &mut R, index: u64, offset: u64) -> Result<(ZipFileEntry, u64)> {
    let mut fixed = [0u8; CDFH_SIZE];
    read_exact(reader, &mut fixed, offset)?;
    let r = ByteRegion::new(&fixed);

    let signature: u32 = r.read_at(0)?;
    if signature != CDFH_SIGNATURE {
        return Err(ZipError::InvalidEntrySignature {
            index,
            found: signature,
        });
    }

    let name_len = r.read_at::<u16>(28)? as usize;
    let extra_len = r.read_at::<u16>(30)? as usize;
    let comment_len = r.read_at::<u16>(32)? as usize;

    let mut variable = vec![0u8; name_len + extra_len + comment_len];
    read_exact(reader, &mut variable, offset + CDFH_SIZE as u64)?;
    let (name, rest) = variable.split_at(name_len);
    let (extra, comment) = rest.split_at(extra_len);

    let compressed_size: u32 = r.read_at(20)?;
    let uncompressed_size: u32 = r.read_at(24)?;
    let header_offset: u32 = r.read_at(42)?;
    let stored_method: u16 = r.read_at(10)?;
    let dos_time: u16 = r.read_at(12)?;
    let dos_date: u16 = r.read_at(14)?;

    let mut entry = ZipFileEntry {
        name: String::from_utf8_lossy(name).into_owned(),
        comment: String::from_utf8_lossy(comment).into_owned(),
        version_made_by: r.read_at(4)?,
        version_needed: r.read_at(6)?,
        flags: ZipFlags::from_bits_retain(r.read_at(8)?),
        method: stored_method,
        stored_method,
        dos_time,
        dos_date,
        modified: None,
        crc32: r.read_at(16)?,
        compressed_size: compressed_size as u64,
        uncompressed_size: uncompressed_size as u64,
        internal_attributes: r.read_at(36)?,
        external_attributes: r.read_at(38)?,
        header_offset: header_offset as u64,
        extra: extra.to_vec(),
        aes: None,
    };

    let mut pending = Zip64Pending {
        uncompressed: uncompressed_size == SENTINEL_U32,
        compressed: compressed_size == SENTINEL_U32,
        offset: header_offset == SENTINEL_U32,
    };
    let extra_modified = apply_extra_fields(&mut entry, extra, index, &mut pending)?;

    if pending.compressed {
        return Err(ZipError::MissingZip64Field {
            index,
            field: "compressed size",
        });
    }
    if pending.offset {
        return Err(ZipError::MissingZip64Field {
            index,
            field: "local header offset",
        });
    }

    entry.modified = extra_modified.or_else(|| dos_datetime(dos_date, dos_time));
    if let Some(aes) = entry.aes {
        entry.method = aes.method;
    }

    trace!(
        index,
        name = %entry.name,
        method = entry.method,
        compressed = entry.compressed_size,
        "Central directory entry"
    );
    Ok((entry, (CDFH_SIZE + variable.len()) as u64))
}

/// Walk the (tag, length, payload) chain, returning any modification time
/// it carries. Unknown tags are skipped; a length overrunning the chain ends it.
fn apply_extra_fields(
    entry: &mut ZipFileEntry,
    extra: &[u8],
    index: u64,
    pending: &mut Zip64Pending,
) -> Result<Option<DateTime<Utc>>> {
    let chain = ByteRegion::new(extra);
    let mut modified = None;
    let mut pos = 0usize;

    while pos + 4 <= chain.len() {
        let tag: u16 = chain.read_at(pos)?;
        let len = chain.read_at::<u16>(pos + 2)? as usize;
        pos += 4;
        let Ok(field) = chain.sub_region(pos, len) else {
            warn!(index, tag, len, "Extra field overruns the extra data");
            break;
        };
        pos += len;

        match tag {
            ZIP64_EXTRA_ID => read_zip64_field(entry, field, index, pending)?,
            NTFS_EXTRA_ID => {
                if let Some(t) = ntfs_mtime(field) {
                    modified = Some(t);
                }
            }
            UNIX_EXTRA_ID | INFOZIP_UNIX_EXTRA_ID => {
                if field.len() >= 8 {
                    // atime first, then mtime
                    modified = unix_seconds(field.read_at(4)?).or(modified);
                }
            }
            EXT_TIME_EXTRA_ID => {
                if field.len() >= 5 && field.read_at::<u8>(0)? & 1 != 0 {
                    modified = unix_seconds(field.read_at(1)?).or(modified);
                }
            }
            WINZIP_AES_EXTRA_ID => {
                if field.len() >= 7 {
                    entry.aes = Some(AesInfo {
                        version: field.read_at(0)?,
                        vendor: field.read_at(2)?,
                        strength: field.read_at(4)?,
                        method: field.read_at(5)?,
                    });
                }
            }
            _ => trace!(tag, len, "Skipping extra field"),
        }
    }

    Ok(modified)
}

/// Zip64 values appear only for sentinel fields, in the order uncompressed
/// size, compressed size, local header offset.
fn read_zip64_field(
    entry: &mut ZipFileEntry,
    field: ByteRegion<'_>,
    index: u64,
    pending: &mut Zip64Pending,
) -> Result<()> {
    let mut pos = 0usize;
    let mut next = |name: &'static str| -> Result<u64> {
        let value = field
            .read_at::<u64>(pos)
            .map_err(|_| ZipError::MalformedZip64Extra { index, field: name })?;
        pos += 8;
        Ok(value)
    };

    if pending.uncompressed {
        entry.uncompressed_size = next("uncompressed size")?;
        pending.uncompressed = false;
    }
    if pending.compressed {
        entry.compressed_size = next("compressed size")?;
        pending.compressed = false;
    }
    if pending.offset {
        entry.header_offset = next("local header offset")?;
        pending.offset = false;
    }
    Ok(())
}

/// First attribute of the NTFS field: tag 1, size 24, mtime/atime/ctime.
fn ntfs_mtime(field: ByteRegion<'_>) -> Option<DateTime<Utc>> {
    // 4 reserved bytes precede the attributes.
    let tag: u16 = field.read_at(4).ok()?;
    let size: u16 = field.read_at(6).ok()?;
    if tag != 1 || size != 24 {
        return None;
    }
    let attribute = field.sub_region(8, 24).ok()?;
    filetime_to_datetime(attribute.read_at(0).ok()?)
}
