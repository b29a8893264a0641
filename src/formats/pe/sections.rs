//! Section management for PE files

use crate::formats::pe::symbols::StringTable;
use crate::formats::pe::types::*;
use crate::formats::region::{padded_name, ByteRegion};
use crate::io::ByteSource;
use tracing::{trace, warn};

/// Section table in file order.
///
/// Lookups are a linear scan returning the first match, so overlapping
/// sections resolve to whichever the file lists first.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Index and section whose virtual range contains `rva`.
    pub fn find_rva(&self, rva: u32) -> Option<(usize, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .find(|(_, s)| s.header.contains_rva(rva))
    }

    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        self.find_rva(rva).map(|(_, s)| s)
    }

    /// File offset backing `rva`, or `None` when the RVA is unmapped or
    /// lies past the section's raw data.
    pub fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        let section = self.section_containing_rva(rva)?;
        let delta = rva - section.header.virtual_address;
        if delta >= section.header.size_of_raw_data {
            return None;
        }
        Some(section.header.pointer_to_raw_data as u64 + delta as u64)
    }

    /// End of the furthest section's raw data.
    pub fn max_raw_end(&self) -> u64 {
        self.sections
            .iter()
            .map(|s| s.header.raw_end())
            .max()
            .unwrap_or(0)
    }
}

/// Parse `count` 40-byte section headers from `data`.
pub fn parse_section_headers(data: &[u8], count: u16) -> Result<Vec<SectionHeader>> {
    let r = ByteRegion::new(data);
    let mut headers = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let base = i * SECTION_HEADER_SIZE;
        let mut name = [0u8; 8];
        name.copy_from_slice(r.substring(base, 8)?);

        headers.push(SectionHeader {
            name,
            virtual_size: r.read_at(base + 8)?,
            virtual_address: r.read_at(base + 12)?,
            size_of_raw_data: r.read_at(base + 16)?,
            pointer_to_raw_data: r.read_at(base + 20)?,
            pointer_to_relocations: r.read_at(base + 24)?,
            pointer_to_line_numbers: r.read_at(base + 28)?,
            number_of_relocations: r.read_at(base + 32)?,
            number_of_line_numbers: r.read_at(base + 34)?,
            characteristics: r.read_at(base + 36)?,
        });
    }

    Ok(headers)
}

/// Read a section's raw data, clamped to the end of the source.
///
/// Sections larger than `max_len` are refused rather than truncated.
pub fn read_section_data<S: ByteSource + ?Sized>(
    source: &S,
    section: &Section,
    max_len: u64,
) -> Result<Vec<u8>> {
    let offset = section.header.pointer_to_raw_data as u64;
    let declared = section.header.size_of_raw_data as u64;
    let available = source.size().saturating_sub(offset);
    let len = if declared > available {
        warn!(
            section = %section.name,
            declared,
            available,
            "Section raw data extends past end of file"
        );
        available
    } else {
        declared
    };

    if len > max_len {
        return Err(PeError::LimitExceeded {
            what: "section data",
            limit: max_len,
            actual: len,
        });
    }

    trace!(section = %section.name, offset, len, "Reading section data");
    Ok(source.read_vec_at(offset, len as usize)?)
}

/// Decimal string-table offset of a `/NNN` long name.
pub fn long_name_offset(raw: &[u8; 8]) -> Option<u32> {
    if raw[0] != b'/' {
        return None;
    }
    let digits = padded_name(&raw[1..]);
    digits.trim().parse().ok()
}

/// Resolve a section name, following `/NNN` into the string table.
///
/// An unresolvable long name falls back to the raw `/NNN` text.
pub fn resolve_section_name(raw: &[u8; 8], strings: Option<&StringTable>) -> String {
    if let (Some(offset), Some(table)) = (long_name_offset(raw), strings) {
        match table.get(offset) {
            Ok(name) => return name,
            Err(e) => {
                warn!(offset, error = %e, "Unresolvable long section name");
            }
        }
    }
    padded_name(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &[u8], va: u32, vsize: u32, raw_ptr: u32, raw_size: u32) -> SectionHeader {
        let mut raw = [0u8; 8];
        raw[..name.len()].copy_from_slice(name);
        SectionHeader {
            name: raw,
            virtual_size: vsize,
            virtual_address: va,
            size_of_raw_data: raw_size,
            pointer_to_raw_data: raw_ptr,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: 0x6000_0020,
        }
    }

    fn table(headers: Vec<SectionHeader>) -> SectionTable {
        SectionTable::new(
            headers
                .into_iter()
                .map(|h| Section {
                    name: padded_name(&h.name),
                    header: h,
                })
                .collect(),
        )
    }

    #[test]
    fn test_rva_lookup() {
        let t = table(vec![
            header(b".text", 0x1000, 0x500, 0x400, 0x600),
            header(b".data", 0x2000, 0x100, 0xA00, 0x200),
        ]);
        assert_eq!(t.section_containing_rva(0x1010).unwrap().name, ".text");
        assert_eq!(t.section_containing_rva(0x2000).unwrap().name, ".data");
        assert!(t.section_containing_rva(0x1500).is_none());
        assert!(t.section_containing_rva(0x500).is_none());
        assert_eq!(t.rva_to_offset(0x1010), Some(0x410));
        assert_eq!(t.max_raw_end(), 0xC00);
    }

    #[test]
    fn test_overlapping_sections_first_wins() {
        let t = table(vec![
            header(b"A", 0x1000, 0x1000, 0x400, 0x200),
            header(b"B", 0x1800, 0x1000, 0x600, 0x200),
        ]);
        assert_eq!(t.find_rva(0x1900).unwrap().0, 0);
        assert_eq!(t.find_rva(0x2100).unwrap().1.name, "B");
    }

    #[test]
    fn test_rva_in_virtual_tail_has_no_offset() {
        let t = table(vec![header(b".bss", 0x3000, 0x1000, 0x400, 0x100)]);
        assert!(t.section_containing_rva(0x3800).is_some());
        assert_eq!(t.rva_to_offset(0x3800), None);
    }

    #[test]
    fn test_parse_section_headers() {
        let mut data = vec![0u8; 80];
        data[0..5].copy_from_slice(b".text");
        data[12..16].copy_from_slice(&0x1000u32.to_le_bytes());
        data[40..45].copy_from_slice(b".data");
        data[76..80].copy_from_slice(&0xC000_0040u32.to_le_bytes());

        let headers = parse_section_headers(&data, 2).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(padded_name(&headers[0].name), ".text");
        assert_eq!(headers[0].virtual_address, 0x1000);
        assert!(headers[1].is_writable());
        assert!(parse_section_headers(&data, 3).is_err());
    }

    #[test]
    fn test_long_name_offset() {
        assert_eq!(long_name_offset(b"/4\0\0\0\0\0\0"), Some(4));
        assert_eq!(long_name_offset(b"/1234567"), Some(1234567));
        assert_eq!(long_name_offset(b".text\0\0\0"), None);
        assert_eq!(long_name_offset(b"/abc\0\0\0\0"), None);
    }

    #[test]
    fn test_resolve_section_name() {
        let table = StringTable::from_bytes(b".debug_info\0".to_vec());
        assert_eq!(
            resolve_section_name(b"/4\0\0\0\0\0\0", Some(&table)),
            ".debug_info"
        );
        assert_eq!(resolve_section_name(b"/4\0\0\0\0\0\0", None), "/4");
        assert_eq!(resolve_section_name(b"/2\0\0\0\0\0\0", Some(&table)), "/2");
    }
}
