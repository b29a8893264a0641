//! Export table parsing

use tracing::{debug, warn};

use crate::config::PeOptions;
use crate::formats::pe::directories::ImageView;
use crate::formats::pe::types::*;
use crate::formats::region::ByteRegion;
use crate::io::ByteSource;

/// Export directory header (40 bytes)
#[derive(Debug, Clone, Copy)]
struct ExportDirectory {
    base: u32,
    number_of_functions: u32,
    number_of_names: u32,
    address_of_functions: u32,
    address_of_names: u32,
    address_of_name_ordinals: u32,
}

/// Offset within `region` of a table of `count` entries of `width` bytes,
/// rejecting tables that do not lie wholly inside the owning section.
fn table_offset(
    region: ByteRegion<'_>,
    section_rva: u32,
    rva: u32,
    count: u32,
    width: usize,
    what: &str,
) -> Result<usize> {
    let outside = || PeError::MalformedExportTable(format!("{what} lies outside the export section"));
    let offset = rva.checked_sub(section_rva).ok_or_else(outside)? as usize;
    let len = (count as usize).checked_mul(width).ok_or_else(outside)?;
    region.substring(offset, len).map_err(|_| outside())?;
    Ok(offset)
}

/// Resolve named exports, sorted by ordinal.
///
/// Exports reachable only by ordinal carry no name and are not listed.
pub fn parse_exports<S: ByteSource + ?Sized>(
    view: &ImageView<'_, S>,
    dir: DataDirectory,
    options: &PeOptions,
) -> Result<Vec<ExportedSymbol>> {
    let Some((index, section)) = view.sections().find_rva(dir.virtual_address) else {
        warn!(rva = dir.virtual_address, "Export directory is not in any section");
        return Ok(Vec::new());
    };
    let section_rva = section.virtual_address();
    let region = ByteRegion::new(view.section_bytes(index)?);
    let at = (dir.virtual_address - section_rva) as usize;

    region.substring(at, EXPORT_DIRECTORY_SIZE).map_err(|_| {
        PeError::MalformedExportTable("export directory runs past its section".into())
    })?;
    let header = ExportDirectory {
        base: region.read_at(at + 16)?,
        number_of_functions: region.read_at(at + 20)?,
        number_of_names: region.read_at(at + 24)?,
        address_of_functions: region.read_at(at + 28)?,
        address_of_names: region.read_at(at + 32)?,
        address_of_name_ordinals: region.read_at(at + 36)?,
    };

    if header.number_of_names == 0 {
        return Ok(Vec::new());
    }
    if header.number_of_names as u64 > options.max_exports as u64 {
        return Err(PeError::LimitExceeded {
            what: "exports",
            limit: options.max_exports as u64,
            actual: header.number_of_names as u64,
        });
    }

    let names = table_offset(
        region,
        section_rva,
        header.address_of_names,
        header.number_of_names,
        4,
        "AddressOfNames",
    )?;
    let ordinals = table_offset(
        region,
        section_rva,
        header.address_of_name_ordinals,
        header.number_of_names,
        2,
        "AddressOfNameOrdinals",
    )?;
    let functions = table_offset(
        region,
        section_rva,
        header.address_of_functions,
        header.number_of_functions,
        4,
        "AddressOfFunctions",
    )?;

    let mut exports = Vec::with_capacity(header.number_of_names as usize);
    for i in 0..header.number_of_names as usize {
        let name_rva: u32 = region.read_at(names + i * 4)?;
        let function_index: u16 = region.read_at(ordinals + i * 2)?;

        if function_index as u32 >= header.number_of_functions {
            return Err(PeError::MalformedExportTable(format!(
                "name ordinal {function_index} exceeds function count {}",
                header.number_of_functions
            )));
        }
        let rva: u32 = region.read_at(functions + function_index as usize * 4)?;

        let name = view.string_at(name_rva, options.max_name_len)?;
        let forwarder = if dir.contains(rva) {
            Some(view.string_at(rva, options.max_name_len)?)
        } else {
            None
        };

        exports.push(ExportedSymbol {
            name,
            ordinal: header.base.wrapping_add(function_index as u32),
            rva,
            hint: i as u32,
            forwarder,
        });
    }

    exports.sort_by_key(|e| e.ordinal);
    debug!(count = exports.len(), base = header.base, "Parsed export table");
    Ok(exports)
}
