//! Configuration for the decoders.
//!
//! Every limit has a default; a JSON document only needs to name the fields
//! it overrides.

use serde::{Deserialize, Serialize};

use crate::formats::pe::types::{LIMIT_OVERLAY_SIZE, SECTION_SIZE_LIMIT};
use crate::io::IOLimits;

/// Master configuration for both decoders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Limits for mapped file sources.
    pub io: IoConfig,
    /// PE/COFF decoding limits.
    pub pe: PeOptions,
    /// ZIP decoding limits.
    pub zip: ZipOptions,
}

impl DecoderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Limits applied when opening and reading mapped files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Largest file that may be opened.
    pub max_file_size: u64,
    /// Total bytes a single source may hand out.
    pub max_read_bytes: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        let limits = IOLimits::default();
        Self {
            max_file_size: limits.max_file_size,
            max_read_bytes: limits.max_read_bytes,
        }
    }
}

impl IoConfig {
    pub fn limits(&self) -> IOLimits {
        IOLimits {
            max_file_size: self.max_file_size,
            max_read_bytes: self.max_read_bytes,
        }
    }
}

/// PE/COFF decoding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeOptions {
    /// Largest overlay `read_overlay` will return.
    pub overlay_limit: u64,
    /// Largest single section (or string table) read into memory.
    pub max_section_data: u64,
    /// Cap on imported functions per directory.
    pub max_imports: usize,
    /// Cap on named exports.
    pub max_exports: usize,
    /// Longest DLL or function name scanned before giving up.
    pub max_name_len: usize,
}

impl Default for PeOptions {
    fn default() -> Self {
        Self {
            overlay_limit: LIMIT_OVERLAY_SIZE, // 64MB
            max_section_data: SECTION_SIZE_LIMIT, // 1GB
            max_imports: 65536,
            max_exports: 65536,
            max_name_len: 4096,
        }
    }
}

/// ZIP decoding options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZipOptions {
    /// Refuse archives declaring more central directory records than this.
    /// The size-derived plausibility bound always applies.
    pub max_entries: Option<u64>,
}
