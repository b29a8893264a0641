//! Overlay location and extraction.
//!
//! The overlay is whatever follows the furthest section's raw data. Installers
//! and self-extracting archives park payloads there.

use tracing::{debug, warn};

use crate::formats::pe::types::*;
use crate::io::ByteSource;

/// Where the overlay starts and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayInfo {
    pub offset: u64,
    pub len: u64,
}

impl OverlayInfo {
    /// `start` is the end of the last byte the image itself claims.
    pub fn locate(start: u64, file_size: u64) -> Self {
        Self {
            offset: start,
            len: file_size.saturating_sub(start),
        }
    }

    pub fn is_present(&self) -> bool {
        self.len > 0
    }
}

/// Read the overlay, refusing payloads larger than `limit`.
///
/// An absent overlay is `Ok(None)`. A refused read leaves nothing behind;
/// the caller can retry with a larger limit.
pub fn read_overlay<S: ByteSource + ?Sized>(
    source: &S,
    info: OverlayInfo,
    limit: u64,
) -> Result<Option<Vec<u8>>> {
    if !info.is_present() {
        return Ok(None);
    }
    if info.len > limit {
        warn!(offset = info.offset, len = info.len, limit, "Overlay exceeds read limit");
        return Err(PeError::LimitExceeded {
            what: "overlay",
            limit,
            actual: info.len,
        });
    }

    debug!(offset = info.offset, len = info.len, "Reading overlay");
    Ok(Some(source.read_vec_at(info.offset, info.len as usize)?))
}
