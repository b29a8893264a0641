//! Import and delay-import table parsing

use tracing::{debug, trace, warn};

use crate::config::PeOptions;
use crate::formats::pe::directories::ImageView;
use crate::formats::pe::types::*;
use crate::io::ByteSource;

/// Delay-load descriptors with this bit clear use the legacy VA layout.
const DELAY_ATTR_RVA_BASED: u32 = 0x1;

#[derive(Debug, Clone, Copy)]
struct ImportDescriptor {
    original_first_thunk: u32,
    name: u32,
    first_thunk: u32,
}

#[derive(Debug, Clone, Copy)]
struct DelayDescriptor {
    attributes: u32,
    dll_name: u32,
    iat: u32,
    name_table: u32,
}

/// Walks thunk arrays while counting against the import cap.
struct ThunkWalker<'v, 'f, S: ByteSource + ?Sized> {
    view: &'v ImageView<'f, S>,
    is_64bit: bool,
    options: &'v PeOptions,
    total: usize,
}

impl<S: ByteSource + ?Sized> ThunkWalker<'_, '_, S> {
    fn width(&self) -> usize {
        if self.is_64bit {
            8
        } else {
            4
        }
    }

    fn ordinal_flag(&self) -> u64 {
        if self.is_64bit {
            1 << 63
        } else {
            1 << 31
        }
    }

    /// Walk the lookup array at `lookup_rva` until its zero entry.
    ///
    /// `iat_rva` is the parallel address table the loader patches.
    fn walk(&mut self, lookup_rva: u32, iat_rva: u32) -> Result<Vec<ImportedFunction>> {
        let (region, start) = self.view.resolve(lookup_rva)?.ok_or_else(|| {
            PeError::MalformedImportTable(format!(
                "thunk array RVA 0x{lookup_rva:08x} is outside every section"
            ))
        })?;

        let width = self.width();
        let mut functions = Vec::new();

        for index in 0usize.. {
            let at = start + index * width;
            let value = if self.is_64bit {
                region.read_at::<u64>(at)
            } else {
                region.read_at::<u32>(at).map(u64::from)
            }
            .map_err(|_| PeError::UnterminatedThunks { rva: lookup_rva })?;

            if value == 0 {
                break;
            }

            self.total += 1;
            if self.total > self.options.max_imports {
                return Err(PeError::LimitExceeded {
                    what: "imports",
                    limit: self.options.max_imports as u64,
                    actual: self.total as u64,
                });
            }

            let slot = iat_rva.wrapping_add((index * width) as u32);
            let function = if value & self.ordinal_flag() != 0 {
                ImportedFunction {
                    name: None,
                    ordinal: Some((value & 0xFFFF) as u16),
                    hint: None,
                    iat_rva: slot,
                }
            } else {
                let hint_rva = (value & 0x7FFF_FFFF) as u32;
                let (hint, name) = self.hint_name(hint_rva)?;
                ImportedFunction {
                    name: Some(name),
                    ordinal: None,
                    hint: Some(hint),
                    iat_rva: slot,
                }
            };
            trace!(?function, "Import thunk");
            functions.push(function);
        }

        Ok(functions)
    }

    fn hint_name(&self, rva: u32) -> Result<(u16, String)> {
        let (region, offset) = self.view.resolve_mapped(rva)?;
        let hint = region.read_at::<u16>(offset).map_err(|_| {
            PeError::MalformedImportTable(format!("hint/name entry at RVA 0x{rva:08x} is truncated"))
        })?;
        let name_rva = rva.checked_add(2).ok_or(PeError::InvalidRva { rva })?;
        let name = self.view.string_at(name_rva, self.options.max_name_len)?;
        Ok((hint, name))
    }
}

/// Resolve the import directory into functions keyed by DLL name.
///
/// A directory whose RVA falls in no section is treated as absent.
pub fn parse_imports<S: ByteSource + ?Sized>(
    view: &ImageView<'_, S>,
    dir: DataDirectory,
    is_64bit: bool,
    options: &PeOptions,
) -> Result<ImportMap> {
    let mut imports = ImportMap::new();
    let Some((region, start)) = view.resolve(dir.virtual_address)? else {
        warn!(rva = dir.virtual_address, "Import directory is not in any section");
        return Ok(imports);
    };

    let mut walker = ThunkWalker {
        view,
        is_64bit,
        options,
        total: 0,
    };

    for index in 0usize.. {
        let at = start + index * IMPORT_DESCRIPTOR_SIZE;
        let raw = region.substring(at, IMPORT_DESCRIPTOR_SIZE).map_err(|_| {
            PeError::MalformedImportTable("descriptor array runs past its section".into())
        })?;
        if raw.iter().all(|&b| b == 0) {
            break;
        }

        let desc = ImportDescriptor {
            original_first_thunk: region.read_at(at)?,
            name: region.read_at(at + 12)?,
            first_thunk: region.read_at(at + 16)?,
        };
        if desc.name == 0 {
            warn!(index, "Import descriptor without a DLL name");
            continue;
        }

        let dll = view.string_at(desc.name, options.max_name_len)?;
        let lookup = if desc.original_first_thunk != 0 {
            desc.original_first_thunk
        } else {
            desc.first_thunk
        };
        let functions = walker.walk(lookup, desc.first_thunk)?;
        debug!(dll = %dll, count = functions.len(), "Parsed import descriptor");
        imports.entry(dll).or_default().extend(functions);
    }

    Ok(imports)
}

/// Resolve the delay-load import directory.
///
/// Only the RVA-based descriptor layout is understood.
pub fn parse_delay_imports<S: ByteSource + ?Sized>(
    view: &ImageView<'_, S>,
    dir: DataDirectory,
    is_64bit: bool,
    options: &PeOptions,
) -> Result<ImportMap> {
    let mut imports = ImportMap::new();
    let Some((region, start)) = view.resolve(dir.virtual_address)? else {
        warn!(rva = dir.virtual_address, "Delay import directory is not in any section");
        return Ok(imports);
    };

    let mut walker = ThunkWalker {
        view,
        is_64bit,
        options,
        total: 0,
    };

    for index in 0usize.. {
        let at = start + index * DELAY_IMPORT_DESCRIPTOR_SIZE;
        let raw = region
            .substring(at, DELAY_IMPORT_DESCRIPTOR_SIZE)
            .map_err(|_| {
                PeError::MalformedImportTable(
                    "delay descriptor array runs past its section".into(),
                )
            })?;
        if raw.iter().all(|&b| b == 0) {
            break;
        }

        let desc = DelayDescriptor {
            attributes: region.read_at(at)?,
            dll_name: region.read_at(at + 4)?,
            iat: region.read_at(at + 12)?,
            name_table: region.read_at(at + 16)?,
        };
        if desc.attributes & DELAY_ATTR_RVA_BASED == 0 {
            return Err(PeError::UnsupportedDelayImport {
                attributes: desc.attributes,
            });
        }

        let dll = view.string_at(desc.dll_name, options.max_name_len)?;
        let lookup = if desc.name_table != 0 {
            desc.name_table
        } else {
            desc.iat
        };
        let functions = walker.walk(lookup, desc.iat)?;
        debug!(dll = %dll, count = functions.len(), "Parsed delay import descriptor");
        imports.entry(dll).or_default().extend(functions);
    }

    Ok(imports)
}
