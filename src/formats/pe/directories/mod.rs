//! Data directory parsers

pub mod export;
pub mod import;

pub use export::parse_exports;
pub use import::{parse_delay_imports, parse_imports};

use std::cell::OnceCell;

use crate::formats::pe::sections::{read_section_data, SectionTable};
use crate::formats::pe::types::*;
use crate::formats::region::ByteRegion;
use crate::io::ByteSource;

/// RVA-addressed view over an image's sections.
///
/// Section data is read on first touch and kept for the lifetime of the view,
/// so one directory walk reads each section at most once.
pub struct ImageView<'f, S: ByteSource + ?Sized> {
    source: &'f S,
    sections: &'f SectionTable,
    max_section_data: u64,
    loaded: Vec<OnceCell<Vec<u8>>>,
}

impl<'f, S: ByteSource + ?Sized> ImageView<'f, S> {
    pub fn new(source: &'f S, sections: &'f SectionTable, max_section_data: u64) -> Self {
        let loaded = sections.sections().iter().map(|_| OnceCell::new()).collect();
        Self {
            source,
            sections,
            max_section_data,
            loaded,
        }
    }

    pub fn sections(&self) -> &SectionTable {
        self.sections
    }

    /// Raw data of the section at `index`.
    pub fn section_bytes(&self, index: usize) -> Result<&[u8]> {
        let (Some(cell), Some(section)) =
            (self.loaded.get(index), self.sections.sections().get(index))
        else {
            return Err(PeError::InvalidRva { rva: 0 });
        };
        if let Some(data) = cell.get() {
            return Ok(data);
        }
        let data = read_section_data(self.source, section, self.max_section_data)?;
        Ok(cell.get_or_init(|| data))
    }

    /// Data of the section containing `rva`, plus the offset of `rva` within it.
    pub fn resolve(&self, rva: u32) -> Result<Option<(ByteRegion<'_>, usize)>> {
        let Some((index, section)) = self.sections.find_rva(rva) else {
            return Ok(None);
        };
        let data = self.section_bytes(index)?;
        let offset = (rva - section.virtual_address()) as usize;
        Ok(Some((ByteRegion::new(data), offset)))
    }

    /// Like [`ImageView::resolve`], but an unmapped RVA is an error.
    pub fn resolve_mapped(&self, rva: u32) -> Result<(ByteRegion<'_>, usize)> {
        self.resolve(rva)?.ok_or(PeError::InvalidRva { rva })
    }

    /// NUL-terminated string at `rva`, scanning at most `max_len` bytes.
    pub fn string_at(&self, rva: u32, max_len: usize) -> Result<String> {
        let (region, offset) = self.resolve_mapped(rva)?;
        let len = region.len().saturating_sub(offset).min(max_len);
        let window = region
            .sub_region(offset, len)
            .map_err(|_| PeError::InvalidRva { rva })?;
        match window.terminated_at(0)? {
            Some(name) => Ok(String::from_utf8_lossy(name).into_owned()),
            None => Err(PeError::UnterminatedString { rva }),
        }
    }
}
