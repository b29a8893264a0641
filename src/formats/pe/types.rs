//! Core PE data types and structures

use bitflags::bitflags;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::formats::region::BoundsError;
use crate::io::error::IoError;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

pub const DOS_HEADER_SIZE: usize = 64;
pub const FILE_HEADER_SIZE: usize = 20;
pub const SECTION_HEADER_SIZE: usize = 40;
pub const COFF_SYMBOL_SIZE: usize = 18;
pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;
pub const DELAY_IMPORT_DESCRIPTOR_SIZE: usize = 32;
pub const EXPORT_DIRECTORY_SIZE: usize = 40;
pub const NUMBER_OF_DIRECTORY_ENTRIES: usize = 16;

/// Fixed part of the PE32 optional header, before the data directories.
pub const OPTIONAL_HEADER32_FIXED_SIZE: usize = 96;
/// Fixed part of the PE32+ optional header, before the data directories.
pub const OPTIONAL_HEADER64_FIXED_SIZE: usize = 112;

/// Default cap for overlay reads (64 MiB).
pub const LIMIT_OVERLAY_SIZE: u64 = 64 * 1024 * 1024;
/// Default cap for a single section read (1 GiB).
pub const SECTION_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;

/// PE parsing error types
#[derive(Error, Debug)]
pub enum PeError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Truncated structure: {0}")]
    Truncated(#[from] BoundsError),

    #[error("Invalid PE signature at offset {offset:#x}: {found:02x?}")]
    InvalidPeSignature { offset: u64, found: [u8; 4] },

    #[error("Invalid optional header magic: 0x{0:04x}")]
    InvalidMagic(u16),

    #[error("Optional header too small: {size} bytes, need at least {required}")]
    OptionalHeaderTooSmall { size: u16, required: usize },

    #[error("Implausible section count {count}: only {remaining} bytes follow the headers")]
    ImplausibleSectionCount { count: u16, remaining: u64 },

    #[error("Implausible symbol count {count}: only {remaining} bytes follow the symbol table pointer")]
    ImplausibleSymbolCount { count: u32, remaining: u64 },

    #[error("Invalid RVA: 0x{rva:08x}")]
    InvalidRva { rva: u32 },

    #[error("Malformed import table: {0}")]
    MalformedImportTable(String),

    #[error("Malformed export table: {0}")]
    MalformedExportTable(String),

    #[error("Thunk array at RVA 0x{rva:08x} has no terminating entry within its section")]
    UnterminatedThunks { rva: u32 },

    #[error("Unsupported VA-based delay import descriptor (attributes 0x{attributes:08x})")]
    UnsupportedDelayImport { attributes: u32 },

    #[error("String at RVA 0x{rva:08x} is not terminated")]
    UnterminatedString { rva: u32 },

    #[error("Invalid string table offset {offset}")]
    InvalidStringTableOffset { offset: u32 },

    #[error("Limit exceeded: {what} is {actual} (limit {limit})")]
    LimitExceeded {
        what: &'static str,
        limit: u64,
        actual: u64,
    },
}

impl PeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => e.kind(),
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            _ => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine type from the COFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Machine(pub u16);

impl Machine {
    pub const UNKNOWN: Machine = Machine(0x0000);
    pub const TARGET_HOST: Machine = Machine(0x0001);
    pub const I386: Machine = Machine(0x014c);
    pub const R3000: Machine = Machine(0x0162);
    pub const R4000: Machine = Machine(0x0166);
    pub const R10000: Machine = Machine(0x0168);
    pub const WCEMIPSV2: Machine = Machine(0x0169);
    pub const ALPHA: Machine = Machine(0x0184);
    pub const SH3: Machine = Machine(0x01a2);
    pub const SH3DSP: Machine = Machine(0x01a3);
    pub const SH3E: Machine = Machine(0x01a4);
    pub const SH4: Machine = Machine(0x01a6);
    pub const SH5: Machine = Machine(0x01a8);
    pub const ARM: Machine = Machine(0x01c0);
    pub const THUMB: Machine = Machine(0x01c2);
    pub const ARMNT: Machine = Machine(0x01c4);
    pub const AM33: Machine = Machine(0x01d3);
    pub const POWERPC: Machine = Machine(0x01f0);
    pub const POWERPCFP: Machine = Machine(0x01f1);
    pub const IA64: Machine = Machine(0x0200);
    pub const MIPS16: Machine = Machine(0x0266);
    pub const ALPHA64: Machine = Machine(0x0284);
    pub const MIPSFPU: Machine = Machine(0x0366);
    pub const MIPSFPU16: Machine = Machine(0x0466);
    pub const TRICORE: Machine = Machine(0x0520);
    pub const CEF: Machine = Machine(0x0cef);
    pub const EBC: Machine = Machine(0x0ebc);
    pub const CHPE_X86: Machine = Machine(0x3a64);
    pub const RISCV32: Machine = Machine(0x5032);
    pub const RISCV64: Machine = Machine(0x5064);
    pub const RISCV128: Machine = Machine(0x5128);
    pub const AMD64: Machine = Machine(0x8664);
    pub const M32R: Machine = Machine(0x9041);
    pub const ARM64EC: Machine = Machine(0xa641);
    pub const ARM64X: Machine = Machine(0xa64e);
    pub const ARM64: Machine = Machine(0xaa64);
    pub const CEE: Machine = Machine(0xc0ee);

    /// Raw COFF value.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Human-readable name, `None` for values outside the known table.
    pub fn name(self) -> Option<&'static str> {
        MACHINE_NAMES
            .iter()
            .find(|(value, _)| *value == self.0)
            .map(|(_, name)| *name)
    }
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        Machine(value)
    }
}

/// Known machine names, keyed by raw value.
pub const MACHINE_NAMES: &[(u16, &str)] = &[
    (0x0000, "Unknown"),
    (0x0001, "Target Host"),
    (0x014c, "Intel 386"),
    (0x0162, "MIPS R3000"),
    (0x0166, "MIPS R4000"),
    (0x0168, "MIPS R10000"),
    (0x0169, "MIPS WCE v2"),
    (0x0184, "Alpha AXP"),
    (0x01a2, "Hitachi SH3"),
    (0x01a3, "Hitachi SH3 DSP"),
    (0x01a4, "Hitachi SH3E"),
    (0x01a6, "Hitachi SH4"),
    (0x01a8, "Hitachi SH5"),
    (0x01c0, "ARM"),
    (0x01c2, "ARM Thumb"),
    (0x01c4, "ARM Thumb-2"),
    (0x01d3, "Matsushita AM33"),
    (0x01f0, "PowerPC"),
    (0x01f1, "PowerPC FP"),
    (0x0200, "Intel Itanium"),
    (0x0266, "MIPS16"),
    (0x0284, "Alpha 64"),
    (0x0366, "MIPS FPU"),
    (0x0466, "MIPS16 FPU"),
    (0x0520, "Infineon TriCore"),
    (0x0cef, "CEF"),
    (0x0ebc, "EFI Byte Code"),
    (0x3a64, "CHPE x86"),
    (0x5032, "RISC-V 32"),
    (0x5064, "RISC-V 64"),
    (0x5128, "RISC-V 128"),
    (0x8664, "AMD64"),
    (0x9041, "Mitsubishi M32R"),
    (0xa641, "ARM64EC"),
    (0xa64e, "ARM64X"),
    (0xaa64, "ARM64"),
    (0xc0ee, "CEE"),
];

/// Subsystem types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Subsystem {
    Unknown,
    Native,                 // 1
    WindowsGui,             // 2
    WindowsCui,             // 3
    Os2Cui,                 // 5
    PosixCui,               // 7
    NativeWindows,          // 8
    WindowsCeGui,           // 9
    EfiApplication,         // 10
    EfiBootServiceDriver,   // 11
    EfiRuntimeDriver,       // 12
    EfiRom,                 // 13
    Xbox,                   // 14
    WindowsBootApplication, // 16
    XboxCodeCatalog,        // 17
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Native,
            2 => Self::WindowsGui,
            3 => Self::WindowsCui,
            5 => Self::Os2Cui,
            7 => Self::PosixCui,
            8 => Self::NativeWindows,
            9 => Self::WindowsCeGui,
            10 => Self::EfiApplication,
            11 => Self::EfiBootServiceDriver,
            12 => Self::EfiRuntimeDriver,
            13 => Self::EfiRom,
            14 => Self::Xbox,
            16 => Self::WindowsBootApplication,
            17 => Self::XboxCodeCatalog,
            other => Self::Other(other),
        }
    }
}

bitflags! {
    /// COFF file header characteristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED = 0x0001;
        const EXECUTABLE_IMAGE = 0x0002;
        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;
        const LARGE_ADDRESS_AWARE = 0x0020;
        const BYTES_REVERSED_LO = 0x0080;
        const MACHINE_32BIT = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;
        const DLL = 0x2000;
        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

bitflags! {
    /// Section header characteristics (the subset worth naming).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct SectionCharacteristics: u32 {
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_INFO = 0x0000_0200;
        const LNK_REMOVE = 0x0000_0800;
        const LNK_COMDAT = 0x0000_1000;
        const LNK_NRELOC_OVFL = 0x0100_0000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Data directory slots of the optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirectoryEntry {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Security = 4,
    BaseReloc = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImport = 13,
    ComDescriptor = 14,
    Reserved = 15,
}

impl DirectoryEntry {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// DOS header (64 bytes)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DosHeader {
    pub e_magic: u16,    // Magic number (MZ)
    pub e_cblp: u16,     // Bytes on last page of file
    pub e_cp: u16,       // Pages in file
    pub e_crlc: u16,     // Relocations
    pub e_cparhdr: u16,  // Size of header in paragraphs
    pub e_minalloc: u16, // Minimum extra paragraphs needed
    pub e_maxalloc: u16, // Maximum extra paragraphs needed
    pub e_ss: u16,       // Initial (relative) SS value
    pub e_sp: u16,       // Initial SP value
    pub e_csum: u16,     // Checksum
    pub e_ip: u16,       // Initial IP value
    pub e_cs: u16,       // Initial (relative) CS value
    pub e_lfarlc: u16,   // File address of relocation table
    pub e_ovno: u16,     // Overlay number
    pub e_lfanew: u32,   // File address of PE header
}

/// COFF file header (20 bytes)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FileHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl FileHeader {
    pub fn flags(&self) -> FileCharacteristics {
        FileCharacteristics::from_bits_retain(self.characteristics)
    }

    pub fn is_dll(&self) -> bool {
        self.flags().contains(FileCharacteristics::DLL)
    }
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    /// An RVA of zero marks the directory as absent.
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }

    pub fn contains(&self, rva: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.size as u64;
        (start..end).contains(&(rva as u64))
    }
}

/// Optional header - common fields
#[derive(Debug, Clone, Serialize)]
pub struct OptionalHeaderCommon {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

/// 32-bit optional header
#[derive(Debug, Clone, Serialize)]
pub struct OptionalHeader32 {
    pub common: OptionalHeaderCommon,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: [DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES],
}

/// 64-bit optional header
#[derive(Debug, Clone, Serialize)]
pub struct OptionalHeader64 {
    pub common: OptionalHeaderCommon,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: [DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES],
}

/// Combined optional header enum
#[derive(Debug, Clone, Serialize)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn magic(&self) -> u16 {
        match self {
            Self::Pe32(h) => h.common.magic,
            Self::Pe32Plus(h) => h.common.magic,
        }
    }

    pub fn entry_point(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.common.address_of_entry_point,
            Self::Pe32Plus(h) => h.common.address_of_entry_point,
        }
    }

    pub fn image_base(&self) -> u64 {
        match self {
            Self::Pe32(h) => h.image_base as u64,
            Self::Pe32Plus(h) => h.image_base,
        }
    }

    /// Only PE32 carries `BaseOfData`.
    pub fn base_of_data(&self) -> Option<u32> {
        match self {
            Self::Pe32(h) => Some(h.base_of_data),
            Self::Pe32Plus(_) => None,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Pe32(h) => h.subsystem,
            Self::Pe32Plus(h) => h.subsystem,
        }
    }

    pub fn size_of_image(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.size_of_image,
            Self::Pe32Plus(h) => h.size_of_image,
        }
    }

    pub fn size_of_headers(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.size_of_headers,
            Self::Pe32Plus(h) => h.size_of_headers,
        }
    }

    pub fn dll_characteristics(&self) -> u16 {
        match self {
            Self::Pe32(h) => h.dll_characteristics,
            Self::Pe32Plus(h) => h.dll_characteristics,
        }
    }

    pub fn checksum(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.checksum,
            Self::Pe32Plus(h) => h.checksum,
        }
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.number_of_rva_and_sizes,
            Self::Pe32Plus(h) => h.number_of_rva_and_sizes,
        }
    }

    pub fn data_directories(&self) -> &[DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES] {
        match self {
            Self::Pe32(h) => &h.data_directories,
            Self::Pe32Plus(h) => &h.data_directories,
        }
    }

    /// Directory slot, or `None` when it is beyond the declared count or has RVA 0.
    pub fn data_directory(&self, entry: DirectoryEntry) -> Option<DataDirectory> {
        let index = entry.index();
        if index as u64 >= self.number_of_rva_and_sizes() as u64 {
            return None;
        }
        let dir = self.data_directories()[index];
        dir.is_present().then_some(dir)
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, Self::Pe32Plus(_))
    }
}

/// Section header as stored in the file
#[derive(Debug, Clone, Serialize)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Extent used for RVA containment. Object files leave `VirtualSize` zero,
    /// so the raw size stands in.
    pub fn virtual_span(&self) -> u32 {
        if self.virtual_size != 0 {
            self.virtual_size
        } else {
            self.size_of_raw_data
        }
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.virtual_span() as u64;
        (start..end).contains(&(rva as u64))
    }

    /// End of the raw data in the file.
    pub fn raw_end(&self) -> u64 {
        self.pointer_to_raw_data as u64 + self.size_of_raw_data as u64
    }

    pub fn flags(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_retain(self.characteristics)
    }

    pub fn is_executable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_READ)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(SectionCharacteristics::MEM_WRITE)
    }

    pub fn contains_code(&self) -> bool {
        self.flags().contains(SectionCharacteristics::CNT_CODE)
    }
}

/// Section with its resolved name
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    /// Inline name, or the string-table entry a `/NNN` name points at.
    pub name: String,
    pub header: SectionHeader,
}

impl Section {
    pub fn virtual_address(&self) -> u32 {
        self.header.virtual_address
    }

    pub fn virtual_size(&self) -> u32 {
        self.header.virtual_size
    }

    /// File offset of the raw data.
    pub fn offset(&self) -> u32 {
        self.header.pointer_to_raw_data
    }

    /// Size of the raw data.
    pub fn size(&self) -> u32 {
        self.header.size_of_raw_data
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        self.header.contains_rva(rva)
    }
}

/// COFF symbol table record, with auxiliary records skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub section_number: i16,
    pub symbol_type: u16,
    pub storage_class: u8,
    pub number_of_aux_symbols: u8,
}

/// One imported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedFunction {
    /// `None` for imports by ordinal.
    pub name: Option<String>,
    /// Set only for imports by ordinal.
    pub ordinal: Option<u16>,
    /// Export-name-table hint; set only for imports by name.
    pub hint: Option<u16>,
    /// RVA of the IAT slot the loader patches for this import.
    pub iat_rva: u32,
}

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedSymbol {
    pub name: String,
    pub ordinal: u32,
    pub rva: u32,
    /// Position in the export name table.
    pub hint: u32,
    /// `DLL.Symbol` when the RVA points back into the export directory.
    pub forwarder: Option<String>,
}

/// Imports keyed by DLL name, as written in the file.
pub type ImportMap = std::collections::BTreeMap<String, Vec<ImportedFunction>>;

/// Imports, delay imports and exports of one image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionTable {
    pub imports: ImportMap,
    pub delay_imports: ImportMap,
    pub exports: Vec<ExportedSymbol>,
}
