//! COFF symbol table and string table

use crate::formats::pe::types::*;
use crate::formats::region::{padded_name, ByteRegion};
use crate::io::ByteSource;
use tracing::{debug, trace};

/// The COFF string table, without its 4-byte length prefix.
///
/// Offsets handed to [`StringTable::get`] count from the start of the
/// prefix, so the first valid offset is 4.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Total length as declared in the file, prefix included.
    pub fn len(&self) -> usize {
        self.data.len() + 4
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// String at `offset`, read up to the next NUL or the table end.
    pub fn get(&self, offset: u32) -> Result<String> {
        let index = offset
            .checked_sub(4)
            .map(|i| i as usize)
            .filter(|&i| i < self.data.len())
            .ok_or(PeError::InvalidStringTableOffset { offset })?;
        Ok(padded_name(&self.data[index..]))
    }

    /// Every NUL-separated entry in table order.
    pub fn entries(&self) -> Vec<String> {
        self.data
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }
}

/// File offset of the string table: right after the symbol records.
pub fn string_table_offset(header: &FileHeader) -> Option<u64> {
    if header.pointer_to_symbol_table == 0 {
        return None;
    }
    Some(
        header.pointer_to_symbol_table as u64
            + header.number_of_symbols as u64 * COFF_SYMBOL_SIZE as u64,
    )
}

/// Load the string table, returning an empty table when the file has none.
pub fn load_string_table<S: ByteSource + ?Sized>(
    source: &S,
    header: &FileHeader,
    max_len: u64,
) -> Result<StringTable> {
    let Some(offset) = string_table_offset(header) else {
        return Ok(StringTable::default());
    };

    let mut prefix = [0u8; 4];
    source.read_exact_at(offset, &mut prefix)?;
    let declared = u32::from_le_bytes(prefix) as u64;
    if declared <= 4 {
        return Ok(StringTable::default());
    }

    let body = declared - 4;
    if body > max_len {
        return Err(PeError::LimitExceeded {
            what: "string table",
            limit: max_len,
            actual: body,
        });
    }

    let data = source.read_vec_at(offset + 4, body as usize)?;
    debug!(offset, len = declared, "Loaded COFF string table");
    Ok(StringTable::from_bytes(data))
}

/// Decode `count` 18-byte symbol records, skipping auxiliary records.
pub fn parse_symbols(data: &[u8], count: u32, strings: &StringTable) -> Result<Vec<Symbol>> {
    let r = ByteRegion::new(data);
    let mut symbols = Vec::new();
    let mut index = 0u64;

    while index < count as u64 {
        let base = index as usize * COFF_SYMBOL_SIZE;
        let raw_name = r.substring(base, 8)?;
        let name = if raw_name[..4] == [0, 0, 0, 0] {
            let offset: u32 = r.read_at(base + 4)?;
            strings.get(offset)?
        } else {
            padded_name(raw_name)
        };

        let symbol = Symbol {
            name,
            value: r.read_at(base + 8)?,
            section_number: r.read_at(base + 12)?,
            symbol_type: r.read_at(base + 14)?,
            storage_class: r.read_at(base + 16)?,
            number_of_aux_symbols: r.read_at(base + 17)?,
        };
        trace!(name = %symbol.name, aux = symbol.number_of_aux_symbols, "COFF symbol");

        index += 1 + symbol.number_of_aux_symbols as u64;
        symbols.push(symbol);
    }

    Ok(symbols)
}
