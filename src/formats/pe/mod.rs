//! PE/COFF decoder.
//!
//! [`PeFile`] owns a [`ByteSource`] and decodes headers and the section table
//! up front. Symbols, imports, exports and the overlay are read on demand
//! through positional reads, so a query never pulls in more than the
//! structures it touches.

use std::sync::OnceLock;

use tracing::{debug, warn};

pub mod directories;
pub mod headers;
pub mod overlay;
pub mod sections;
pub mod symbols;
pub mod types;

use crate::config::PeOptions;
use crate::io::ByteSource;
use directories::ImageView;
use headers::*;
use overlay::OverlayInfo;
use sections::*;
use symbols::{load_string_table, parse_symbols, StringTable};
pub use types::*;

/// A decoded PE image or COFF object.
pub struct PeFile<S: ByteSource> {
    source: S,
    size: u64,
    dos_header: Option<DosHeader>,
    file_header: FileHeader,
    optional_header: Option<OptionalHeader>,
    section_table: SectionTable,
    headers_end: u64,
    options: PeOptions,

    // Lazy-loaded data
    strings: OnceLock<StringTable>,
}

impl<S: ByteSource> PeFile<S> {
    /// Decode with default options.
    pub fn parse(source: S) -> Result<Self> {
        Self::with_options(source, PeOptions::default())
    }

    /// Decode with custom options.
    ///
    /// Input without the `MZ` magic is taken as a headerless COFF object
    /// whose file header sits at offset 0.
    pub fn with_options(source: S, options: PeOptions) -> Result<Self> {
        let size = source.size();

        let mut magic = [0u8; 2];
        source.read_exact_at(0, &mut magic)?;

        let (dos_header, file_header_offset) = if u16::from_le_bytes(magic) == DOS_SIGNATURE {
            let raw = source.read_vec_at(0, DOS_HEADER_SIZE)?;
            let dos = parse_dos_header(&raw)?;
            let pe_offset = dos.e_lfanew as u64;

            let mut signature = [0u8; 4];
            source.read_exact_at(pe_offset, &mut signature)?;
            if signature != PE_SIGNATURE {
                return Err(PeError::InvalidPeSignature {
                    offset: pe_offset,
                    found: signature,
                });
            }
            (Some(dos), pe_offset + 4)
        } else {
            debug!("No MZ header, decoding as COFF object");
            (None, 0)
        };

        let raw = source.read_vec_at(file_header_offset, FILE_HEADER_SIZE)?;
        let file_header = parse_file_header(&raw)?;

        let optional_offset = file_header_offset + FILE_HEADER_SIZE as u64;
        let optional_header = match file_header.size_of_optional_header {
            0 => None,
            n => {
                let raw = source.read_vec_at(optional_offset, n as usize)?;
                Some(parse_optional_header(&raw)?)
            }
        };

        let section_offset = optional_offset + file_header.size_of_optional_header as u64;
        let count = file_header.number_of_sections;
        let table_len = count as u64 * SECTION_HEADER_SIZE as u64;
        let remaining = size.saturating_sub(section_offset);
        if table_len > remaining {
            warn!(count, remaining, "Section count does not fit in file");
            return Err(PeError::ImplausibleSectionCount { count, remaining });
        }

        let raw = source.read_vec_at(section_offset, table_len as usize)?;
        let headers = parse_section_headers(&raw, count)?;

        let strings = OnceLock::new();
        let needs_strings = headers.iter().any(|h| long_name_offset(&h.name).is_some());
        if needs_strings {
            match load_string_table(&source, &file_header, options.max_section_data) {
                Ok(table) => {
                    let _ = strings.set(table);
                }
                Err(e) => warn!(error = %e, "Could not load string table for section names"),
            }
        }

        let sections = headers
            .into_iter()
            .map(|header| Section {
                name: resolve_section_name(&header.name, strings.get()),
                header,
            })
            .collect();

        debug!(
            machine = ?file_header.machine,
            sections = count,
            is_64bit = ?optional_header.as_ref().map(|h| h.is_64bit()),
            object = dos_header.is_none(),
            "Parsed PE headers"
        );

        Ok(Self {
            source,
            size,
            dos_header,
            file_header,
            optional_header,
            section_table: SectionTable::new(sections),
            headers_end: section_offset + table_len,
            options,
            strings,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Size of the underlying source in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn options(&self) -> &PeOptions {
        &self.options
    }

    // Header access methods

    /// `None` for headerless COFF objects.
    pub fn dos_header(&self) -> Option<&DosHeader> {
        self.dos_header.as_ref()
    }

    pub fn is_object(&self) -> bool {
        self.dos_header.is_none()
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    pub fn optional_header(&self) -> Option<&OptionalHeader> {
        self.optional_header.as_ref()
    }

    pub fn is_64bit(&self) -> bool {
        self.optional_header
            .as_ref()
            .is_some_and(OptionalHeader::is_64bit)
    }

    pub fn machine(&self) -> Machine {
        self.file_header.machine
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.optional_header.as_ref().map(OptionalHeader::entry_point)
    }

    pub fn image_base(&self) -> Option<u64> {
        self.optional_header.as_ref().map(OptionalHeader::image_base)
    }

    pub fn subsystem(&self) -> Option<Subsystem> {
        self.optional_header.as_ref().map(OptionalHeader::subsystem)
    }

    /// Directory slot, `None` when absent or beyond the declared count.
    pub fn data_directory(&self, entry: DirectoryEntry) -> Option<DataDirectory> {
        self.optional_header.as_ref()?.data_directory(entry)
    }

    // Section access methods

    pub fn sections(&self) -> &[Section] {
        self.section_table.sections()
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.section_table.section_by_name(name)
    }

    /// First section in file order whose virtual range contains `rva`.
    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        self.section_table.section_containing_rva(rva)
    }

    pub fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        self.section_table.rva_to_offset(rva)
    }

    /// Raw data of `section`, clamped to the end of the file.
    pub fn section_data(&self, section: &Section) -> Result<Vec<u8>> {
        read_section_data(&self.source, section, self.options.max_section_data)
    }

    // Symbol methods

    /// The COFF string table, loaded on first use.
    pub fn string_table(&self) -> Result<&StringTable> {
        if let Some(table) = self.strings.get() {
            return Ok(table);
        }
        let table = load_string_table(
            &self.source,
            &self.file_header,
            self.options.max_section_data,
        )?;
        Ok(self.strings.get_or_init(|| table))
    }

    /// Every string in the COFF string table.
    pub fn string_table_entries(&self) -> Result<Vec<String>> {
        Ok(self.string_table()?.entries())
    }

    /// COFF symbols, auxiliary records skipped.
    pub fn symbols(&self) -> Result<Vec<Symbol>> {
        let header = &self.file_header;
        if header.pointer_to_symbol_table == 0 || header.number_of_symbols == 0 {
            return Ok(Vec::new());
        }

        let offset = header.pointer_to_symbol_table as u64;
        let len = header.number_of_symbols as u64 * COFF_SYMBOL_SIZE as u64;
        let remaining = self.size.saturating_sub(offset);
        if len > remaining {
            return Err(PeError::ImplausibleSymbolCount {
                count: header.number_of_symbols,
                remaining,
            });
        }

        let raw = self.source.read_vec_at(offset, len as usize)?;
        parse_symbols(&raw, header.number_of_symbols, self.string_table()?)
    }

    // Import/Export methods

    fn view(&self) -> ImageView<'_, S> {
        ImageView::new(
            &self.source,
            &self.section_table,
            self.options.max_section_data,
        )
    }

    fn imports_in(&self, view: &ImageView<'_, S>) -> Result<ImportMap> {
        match self.data_directory(DirectoryEntry::Import) {
            Some(dir) => directories::parse_imports(view, dir, self.is_64bit(), &self.options),
            None => Ok(ImportMap::new()),
        }
    }

    fn delay_imports_in(&self, view: &ImageView<'_, S>) -> Result<ImportMap> {
        match self.data_directory(DirectoryEntry::DelayImport) {
            Some(dir) => {
                directories::parse_delay_imports(view, dir, self.is_64bit(), &self.options)
            }
            None => Ok(ImportMap::new()),
        }
    }

    fn exports_in(&self, view: &ImageView<'_, S>) -> Result<Vec<ExportedSymbol>> {
        match self.data_directory(DirectoryEntry::Export) {
            Some(dir) => directories::parse_exports(view, dir, &self.options),
            None => Ok(Vec::new()),
        }
    }

    /// Imported functions keyed by DLL name.
    pub fn imports(&self) -> Result<ImportMap> {
        self.imports_in(&self.view())
    }

    /// Delay-loaded imports keyed by DLL name.
    pub fn delay_imports(&self) -> Result<ImportMap> {
        self.delay_imports_in(&self.view())
    }

    /// Named exports sorted by ordinal.
    pub fn exports(&self) -> Result<Vec<ExportedSymbol>> {
        self.exports_in(&self.view())
    }

    /// Imports, delay imports and exports in one pass over the sections.
    pub fn function_table(&self) -> Result<FunctionTable> {
        let view = self.view();
        Ok(FunctionTable {
            imports: self.imports_in(&view)?,
            delay_imports: self.delay_imports_in(&view)?,
            exports: self.exports_in(&view)?,
        })
    }

    // Overlay methods

    fn overlay_info(&self) -> OverlayInfo {
        let start = self.section_table.max_raw_end().max(self.headers_end);
        OverlayInfo::locate(start, self.size)
    }

    /// File offset where the overlay starts.
    pub fn overlay_offset(&self) -> u64 {
        self.overlay_info().offset
    }

    /// Number of bytes past the image; zero when there is no overlay.
    pub fn overlay_len(&self) -> u64 {
        self.overlay_info().len
    }

    /// Read the overlay under the configured limit.
    pub fn read_overlay(&self) -> Result<Option<Vec<u8>>> {
        self.read_overlay_with_limit(self.options.overlay_limit)
    }

    /// Read the overlay, refusing more than `limit` bytes.
    pub fn read_overlay_with_limit(&self, limit: u64) -> Result<Option<Vec<u8>>> {
        overlay::read_overlay(&self.source, self.overlay_info(), limit)
    }
}

impl<S: ByteSource> std::fmt::Debug for PeFile<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeFile")
            .field("size", &self.size)
            .field("machine", &self.file_header.machine)
            .field("sections", &self.section_table.sections().len())
            .field("is_64bit", &self.is_64bit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::IoError;

    fn create_minimal_pe() -> Vec<u8> {
        let mut data = vec![0u8; 1024];

        // DOS header
        data[0] = 0x4D; // MZ
        data[1] = 0x5A;
        data[60] = 0x80; // e_lfanew

        // PE signature at offset 0x80
        data[0x80..0x84].copy_from_slice(b"PE\0\0");

        // COFF header at 0x84
        data[0x84] = 0x4C; // Machine: x86
        data[0x85] = 0x01;
        data[0x86] = 0x01; // Number of sections: 1
        data[0x94] = 0x60; // Size of optional header

        // Optional header at 0x98
        data[0x98] = 0x0B; // Magic: PE32
        data[0x99] = 0x01;

        // Entry point
        data[0xA9] = 0x10;

        // Image base
        data[0xB6] = 0x40;

        // Subsystem: console
        data[0xDC] = 0x03;

        // Number of RVA and sizes; the header has no room for any
        data[0xF4] = 0x10;

        // Section header at 0xF8
        let section_offset = 0xF8;
        data[section_offset..section_offset + 5].copy_from_slice(b".text");
        data[section_offset + 9] = 0x10; // virtual size
        data[section_offset + 13] = 0x10; // virtual address
        data[section_offset + 17] = 0x02; // size of raw data
        data[section_offset + 21] = 0x02; // pointer to raw data
        data[section_offset + 36] = 0x20;
        data[section_offset + 39] = 0x60;

        data
    }

    #[test]
    fn test_parse_minimal_pe() {
        let data = create_minimal_pe();
        let pe = PeFile::parse(data.as_slice()).unwrap();

        assert_eq!(pe.machine(), Machine::I386);
        assert!(!pe.is_64bit());
        assert!(!pe.is_object());
        assert_eq!(pe.entry_point(), Some(0x1000));
        assert_eq!(pe.image_base(), Some(0x400000));
        assert_eq!(pe.subsystem(), Some(Subsystem::WindowsCui));
        assert_eq!(pe.sections().len(), 1);
        assert_eq!(pe.sections()[0].name, ".text");
        assert!(pe.sections()[0].header.is_executable());
        assert!(pe.data_directory(DirectoryEntry::Import).is_none());
    }

    #[test]
    fn test_rva_to_offset() {
        let data = create_minimal_pe();
        let pe = PeFile::parse(data.as_slice()).unwrap();

        assert_eq!(pe.rva_to_offset(0x1000), Some(0x200));
        assert_eq!(pe.rva_to_offset(0x1100), Some(0x300));
        assert_eq!(pe.rva_to_offset(0x5000), None);
        assert_eq!(pe.section_containing_rva(0x1FFF).unwrap().name, ".text");
    }

    #[test]
    fn test_no_overlay() {
        let data = create_minimal_pe();
        let pe = PeFile::parse(data.as_slice()).unwrap();

        assert_eq!(pe.overlay_offset(), 0x400);
        assert_eq!(pe.overlay_len(), 0);
        assert_eq!(pe.read_overlay().unwrap(), None);
    }

    #[test]
    fn test_empty_tables() {
        let data = create_minimal_pe();
        let pe = PeFile::parse(data.as_slice()).unwrap();

        let table = pe.function_table().unwrap();
        assert!(table.imports.is_empty());
        assert!(table.delay_imports.is_empty());
        assert!(table.exports.is_empty());
        assert!(pe.symbols().unwrap().is_empty());
        assert!(pe.string_table_entries().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pe_signature() {
        let mut data = create_minimal_pe();
        data[0x80] = b'X';
        assert!(matches!(
            PeFile::parse(data.as_slice()),
            Err(PeError::InvalidPeSignature { offset: 0x80, .. })
        ));
    }

    #[test]
    fn test_e_lfanew_past_end() {
        let mut data = create_minimal_pe();
        data[60..64].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        let err = PeFile::parse(data.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            PeError::Io(IoError::UnexpectedEof {
                offset: 0xFFFF_0000,
                wanted: 4,
                ..
            })
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_implausible_section_count() {
        let mut data = create_minimal_pe();
        data[0x86..0x88].copy_from_slice(&0xFFFFu16.to_le_bytes());
        assert!(matches!(
            PeFile::parse(data.as_slice()),
            Err(PeError::ImplausibleSectionCount { count: 0xFFFF, .. })
        ));
    }

    #[test]
    fn test_section_data() {
        let mut data = create_minimal_pe();
        data[0x200..0x204].copy_from_slice(&[0xC3, 0x90, 0x90, 0xCC]);
        let pe = PeFile::parse(data.as_slice()).unwrap();
        let text = pe.section_by_name(".text").unwrap();
        let bytes = pe.section_data(text).unwrap();
        assert_eq!(bytes.len(), 0x200);
        assert_eq!(&bytes[..4], &[0xC3, 0x90, 0x90, 0xCC]);
    }
}
