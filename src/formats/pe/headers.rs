//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::region::ByteRegion;

/// Parse the DOS header. `data` must hold at least 64 bytes.
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    let r = ByteRegion::new(data);
    Ok(DosHeader {
        e_magic: r.read_at(0)?,
        e_cblp: r.read_at(2)?,
        e_cp: r.read_at(4)?,
        e_crlc: r.read_at(6)?,
        e_cparhdr: r.read_at(8)?,
        e_minalloc: r.read_at(10)?,
        e_maxalloc: r.read_at(12)?,
        e_ss: r.read_at(14)?,
        e_sp: r.read_at(16)?,
        e_csum: r.read_at(18)?,
        e_ip: r.read_at(20)?,
        e_cs: r.read_at(22)?,
        e_lfarlc: r.read_at(24)?,
        e_ovno: r.read_at(26)?,
        e_lfanew: r.read_at(60)?,
    })
}

/// Parse the 20-byte COFF file header.
pub fn parse_file_header(data: &[u8]) -> Result<FileHeader> {
    let r = ByteRegion::new(data);
    Ok(FileHeader {
        machine: Machine::from(r.read_at::<u16>(0)?),
        number_of_sections: r.read_at(2)?,
        time_date_stamp: r.read_at(4)?,
        pointer_to_symbol_table: r.read_at(8)?,
        number_of_symbols: r.read_at(12)?,
        size_of_optional_header: r.read_at(16)?,
        characteristics: r.read_at(18)?,
    })
}

/// Parse the optional header. `data` is exactly `SizeOfOptionalHeader` bytes.
///
/// The layout is picked by the magic, never by the machine type.
pub fn parse_optional_header(data: &[u8]) -> Result<OptionalHeader> {
    let size = data.len();
    if size < 2 {
        return Err(PeError::OptionalHeaderTooSmall {
            size: size as u16,
            required: 2,
        });
    }

    let r = ByteRegion::new(data);
    let magic: u16 = r.read_at(0)?;
    match magic {
        PE32_MAGIC => parse_optional_header32(r),
        PE32PLUS_MAGIC => parse_optional_header64(r),
        _ => Err(PeError::InvalidMagic(magic)),
    }
}

fn parse_common(r: ByteRegion<'_>) -> Result<OptionalHeaderCommon> {
    Ok(OptionalHeaderCommon {
        magic: r.read_at(0)?,
        major_linker_version: r.read_at(2)?,
        minor_linker_version: r.read_at(3)?,
        size_of_code: r.read_at(4)?,
        size_of_initialized_data: r.read_at(8)?,
        size_of_uninitialized_data: r.read_at(12)?,
        address_of_entry_point: r.read_at(16)?,
        base_of_code: r.read_at(20)?,
    })
}

fn require_fixed(r: ByteRegion<'_>, required: usize) -> Result<()> {
    if r.len() < required {
        return Err(PeError::OptionalHeaderTooSmall {
            size: r.len() as u16,
            required,
        });
    }
    Ok(())
}

fn parse_optional_header32(r: ByteRegion<'_>) -> Result<OptionalHeader> {
    require_fixed(r, OPTIONAL_HEADER32_FIXED_SIZE)?;
    let number_of_rva_and_sizes = r.read_at(92)?;

    let header = OptionalHeader32 {
        common: parse_common(r)?,
        base_of_data: r.read_at(24)?,
        image_base: r.read_at(28)?,
        section_alignment: r.read_at(32)?,
        file_alignment: r.read_at(36)?,
        major_operating_system_version: r.read_at(40)?,
        minor_operating_system_version: r.read_at(42)?,
        major_image_version: r.read_at(44)?,
        minor_image_version: r.read_at(46)?,
        major_subsystem_version: r.read_at(48)?,
        minor_subsystem_version: r.read_at(50)?,
        win32_version_value: r.read_at(52)?,
        size_of_image: r.read_at(56)?,
        size_of_headers: r.read_at(60)?,
        checksum: r.read_at(64)?,
        subsystem: Subsystem::from(r.read_at::<u16>(68)?),
        dll_characteristics: r.read_at(70)?,
        size_of_stack_reserve: r.read_at(72)?,
        size_of_stack_commit: r.read_at(76)?,
        size_of_heap_reserve: r.read_at(80)?,
        size_of_heap_commit: r.read_at(84)?,
        loader_flags: r.read_at(88)?,
        number_of_rva_and_sizes,
        data_directories: parse_data_directories(
            r,
            OPTIONAL_HEADER32_FIXED_SIZE,
            number_of_rva_and_sizes,
        )?,
    };

    Ok(OptionalHeader::Pe32(header))
}

fn parse_optional_header64(r: ByteRegion<'_>) -> Result<OptionalHeader> {
    require_fixed(r, OPTIONAL_HEADER64_FIXED_SIZE)?;
    let number_of_rva_and_sizes = r.read_at(108)?;

    let header = OptionalHeader64 {
        common: parse_common(r)?,
        image_base: r.read_at(24)?,
        section_alignment: r.read_at(32)?,
        file_alignment: r.read_at(36)?,
        major_operating_system_version: r.read_at(40)?,
        minor_operating_system_version: r.read_at(42)?,
        major_image_version: r.read_at(44)?,
        minor_image_version: r.read_at(46)?,
        major_subsystem_version: r.read_at(48)?,
        minor_subsystem_version: r.read_at(50)?,
        win32_version_value: r.read_at(52)?,
        size_of_image: r.read_at(56)?,
        size_of_headers: r.read_at(60)?,
        checksum: r.read_at(64)?,
        subsystem: Subsystem::from(r.read_at::<u16>(68)?),
        dll_characteristics: r.read_at(70)?,
        size_of_stack_reserve: r.read_at(72)?,
        size_of_stack_commit: r.read_at(80)?,
        size_of_heap_reserve: r.read_at(88)?,
        size_of_heap_commit: r.read_at(96)?,
        loader_flags: r.read_at(104)?,
        number_of_rva_and_sizes,
        data_directories: parse_data_directories(
            r,
            OPTIONAL_HEADER64_FIXED_SIZE,
            number_of_rva_and_sizes,
        )?,
    };

    Ok(OptionalHeader::Pe32Plus(header))
}

/// Read up to 16 directory entries that actually fit in the header.
///
/// Slots past the declared count or past the end of the header stay zeroed.
fn parse_data_directories(
    r: ByteRegion<'_>,
    offset: usize,
    declared: u32,
) -> Result<[DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES]> {
    let mut directories = [DataDirectory::default(); NUMBER_OF_DIRECTORY_ENTRIES];
    let fits = r.len().saturating_sub(offset) / 8;
    let count = (declared as usize)
        .min(NUMBER_OF_DIRECTORY_ENTRIES)
        .min(fits);

    for (i, dir) in directories.iter_mut().enumerate().take(count) {
        let at = offset + i * 8;
        *dir = DataDirectory {
            virtual_address: r.read_at(at)?,
            size: r.read_at(at + 4)?,
        };
    }

    Ok(directories)
}
