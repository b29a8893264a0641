//! Shared fixtures for integration tests.
//!
//! Images are synthesized byte by byte so every test states exactly what
//! it feeds the decoder.

#![allow(dead_code)]

pub mod test_utils;

pub const FILE_ALIGNMENT: usize = 0x200;
pub const E_LFANEW: usize = 0x80;

fn put(buf: &mut Vec<u8>, at: usize, bytes: &[u8]) {
    if buf.len() < at + bytes.len() {
        buf.resize(at + bytes.len(), 0);
    }
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

/// One section of a synthesized image.
#[derive(Debug, Clone)]
pub struct TestSection {
    pub name: &'static str,
    pub rva: u32,
    pub virtual_size: u32,
    pub data: Vec<u8>,
    pub characteristics: u32,
}

impl TestSection {
    pub fn code(rva: u32, data: Vec<u8>) -> Self {
        Self {
            name: ".text",
            rva,
            virtual_size: data.len() as u32,
            data,
            characteristics: 0x6000_0020,
        }
    }

    pub fn rdata(name: &'static str, rva: u32, data: Vec<u8>) -> Self {
        Self {
            name,
            rva,
            virtual_size: data.len() as u32,
            data,
            characteristics: 0x4000_0040,
        }
    }
}

/// Builder for minimal but well-formed PE images.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    pub pe64: bool,
    pub machine: u16,
    pub characteristics: u16,
    pub subsystem: u16,
    pub entry_point: u32,
    pub image_base: u64,
    pub sections: Vec<TestSection>,
    pub directories: Vec<(usize, u32, u32)>,
    pub overlay: Vec<u8>,
}

impl PeBuilder {
    pub fn new(pe64: bool) -> Self {
        Self {
            pe64,
            machine: if pe64 { 0x8664 } else { 0x014c },
            characteristics: 0x0102,
            subsystem: 3,
            entry_point: 0x1000,
            image_base: if pe64 { 0x1_4000_0000 } else { 0x40_0000 },
            sections: Vec::new(),
            directories: Vec::new(),
            overlay: Vec::new(),
        }
    }

    pub fn section(mut self, section: TestSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories.push((index, rva, size));
        self
    }

    pub fn overlay(mut self, bytes: &[u8]) -> Self {
        self.overlay = bytes.to_vec();
        self
    }

    pub fn optional_header_size(&self) -> usize {
        (if self.pe64 { 112 } else { 96 }) + 16 * 8
    }

    /// File offset of the first section's raw data.
    pub fn headers_size(&self) -> usize {
        let end = E_LFANEW + 4 + 20 + self.optional_header_size() + 40 * self.sections.len();
        align(end, FILE_ALIGNMENT)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put(&mut out, 0, b"MZ");
        put(&mut out, 60, &(E_LFANEW as u32).to_le_bytes());
        put(&mut out, E_LFANEW, b"PE\0\0");

        let fh = E_LFANEW + 4;
        put(&mut out, fh, &self.machine.to_le_bytes());
        put(&mut out, fh + 2, &(self.sections.len() as u16).to_le_bytes());
        put(&mut out, fh + 4, &0x5F5E_1000u32.to_le_bytes());
        put(&mut out, fh + 16, &(self.optional_header_size() as u16).to_le_bytes());
        put(&mut out, fh + 18, &self.characteristics.to_le_bytes());

        let oh = fh + 20;
        let size_of_image = self
            .sections
            .iter()
            .map(|s| s.rva + s.virtual_size)
            .max()
            .unwrap_or(0x1000);
        put(
            &mut out,
            oh,
            &(if self.pe64 { 0x20bu16 } else { 0x10bu16 }).to_le_bytes(),
        );
        put(&mut out, oh + 16, &self.entry_point.to_le_bytes());
        if self.pe64 {
            put(&mut out, oh + 24, &self.image_base.to_le_bytes());
        } else {
            put(&mut out, oh + 28, &(self.image_base as u32).to_le_bytes());
        }
        put(&mut out, oh + 32, &0x1000u32.to_le_bytes());
        put(&mut out, oh + 36, &(FILE_ALIGNMENT as u32).to_le_bytes());
        put(&mut out, oh + 56, &size_of_image.to_le_bytes());
        put(&mut out, oh + 60, &(self.headers_size() as u32).to_le_bytes());
        put(&mut out, oh + 68, &self.subsystem.to_le_bytes());
        let (count_at, dirs_at) = if self.pe64 { (108, 112) } else { (92, 96) };
        put(&mut out, oh + count_at, &16u32.to_le_bytes());
        for &(index, rva, size) in &self.directories {
            let at = oh + dirs_at + index * 8;
            put(&mut out, at, &rva.to_le_bytes());
            put(&mut out, at + 4, &size.to_le_bytes());
        }

        let mut raw = self.headers_size();
        let table = oh + self.optional_header_size();
        for (i, section) in self.sections.iter().enumerate() {
            let at = table + i * 40;
            let mut name = [0u8; 8];
            name[..section.name.len()].copy_from_slice(section.name.as_bytes());
            let raw_size = align(section.data.len(), FILE_ALIGNMENT);
            put(&mut out, at, &name);
            put(&mut out, at + 8, &section.virtual_size.to_le_bytes());
            put(&mut out, at + 12, &section.rva.to_le_bytes());
            put(&mut out, at + 16, &(raw_size as u32).to_le_bytes());
            put(&mut out, at + 20, &(raw as u32).to_le_bytes());
            put(&mut out, at + 36, &section.characteristics.to_le_bytes());

            let mut padded = section.data.clone();
            padded.resize(raw_size, 0);
            put(&mut out, raw, &padded);
            raw += raw_size;
        }
        out.resize(raw, 0);
        out.extend_from_slice(&self.overlay);
        out
    }
}

/// One imported function: by name, or by ordinal when written `#N`.
fn import_ordinal(function: &str) -> Option<u16> {
    function.strip_prefix('#').and_then(|n| n.parse().ok())
}

/// Lay out an import directory at `base_rva`. Returns the section bytes and
/// the directory size.
pub fn import_section(base_rva: u32, pe64: bool, dlls: &[(&str, &[&str])]) -> (Vec<u8>, u32) {
    let width = if pe64 { 8 } else { 4 };
    let ordinal_flag: u64 = if pe64 { 1 << 63 } else { 1 << 31 };
    let dir_size = (dlls.len() + 1) * 20;

    let mut buf = vec![0u8; dir_size];
    let mut pos = dir_size;
    let mut thunk_arrays = Vec::new();
    for (_, functions) in dlls {
        let ilt = pos;
        pos += (functions.len() + 1) * width;
        let iat = pos;
        pos += (functions.len() + 1) * width;
        thunk_arrays.push((ilt, iat));
    }

    for (i, (dll, functions)) in dlls.iter().enumerate() {
        let (ilt, iat) = thunk_arrays[i];
        for (j, function) in functions.iter().enumerate() {
            let value = match import_ordinal(function) {
                Some(ordinal) => ordinal_flag | ordinal as u64,
                None => {
                    let hint_at = align(pos, 2);
                    put(&mut buf, hint_at, &(j as u16).to_le_bytes());
                    put(&mut buf, hint_at + 2, function.as_bytes());
                    put(&mut buf, hint_at + 2 + function.len(), &[0]);
                    pos = hint_at + 3 + function.len();
                    base_rva as u64 + hint_at as u64
                }
            };
            let bytes = value.to_le_bytes();
            put(&mut buf, ilt + j * width, &bytes[..width]);
            put(&mut buf, iat + j * width, &bytes[..width]);
        }
        let name_at = pos;
        put(&mut buf, name_at, dll.as_bytes());
        put(&mut buf, name_at + dll.len(), &[0]);
        pos = name_at + dll.len() + 1;

        let desc = i * 20;
        put(&mut buf, desc, &(base_rva + ilt as u32).to_le_bytes());
        put(&mut buf, desc + 12, &(base_rva + name_at as u32).to_le_bytes());
        put(&mut buf, desc + 16, &(base_rva + iat as u32).to_le_bytes());
    }
    buf.resize(pos, 0);
    (buf, dir_size as u32)
}

/// An exported function: a code RVA, or a forwarder string.
#[derive(Debug, Clone, Copy)]
pub enum ExportTarget<'a> {
    Code(u32),
    Forward(&'a str),
}

/// Lay out an export directory at `base_rva`. `names` pairs each name with
/// an index into `functions`. The whole blob counts as the directory, so
/// forwarder strings fall inside it.
pub fn export_section(
    base_rva: u32,
    dll: &str,
    ordinal_base: u32,
    functions: &[ExportTarget<'_>],
    names: &[(&str, u16)],
) -> (Vec<u8>, u32) {
    let mut buf = vec![0u8; 40];
    let functions_at = 40;
    let names_at = functions_at + functions.len() * 4;
    let ordinals_at = names_at + names.len() * 4;
    let mut pos = ordinals_at + names.len() * 2;

    let dll_at = pos;
    put(&mut buf, dll_at, dll.as_bytes());
    put(&mut buf, dll_at + dll.len(), &[0]);
    pos += dll.len() + 1;

    for (i, function) in functions.iter().enumerate() {
        let rva = match function {
            ExportTarget::Code(rva) => *rva,
            ExportTarget::Forward(target) => {
                let at = pos;
                put(&mut buf, at, target.as_bytes());
                put(&mut buf, at + target.len(), &[0]);
                pos += target.len() + 1;
                base_rva + at as u32
            }
        };
        put(&mut buf, functions_at + i * 4, &rva.to_le_bytes());
    }
    for (i, (name, index)) in names.iter().enumerate() {
        let at = pos;
        put(&mut buf, at, name.as_bytes());
        put(&mut buf, at + name.len(), &[0]);
        pos += name.len() + 1;
        put(&mut buf, names_at + i * 4, &(base_rva + at as u32).to_le_bytes());
        put(&mut buf, ordinals_at + i * 2, &index.to_le_bytes());
    }

    put(&mut buf, 12, &(base_rva + dll_at as u32).to_le_bytes());
    put(&mut buf, 16, &ordinal_base.to_le_bytes());
    put(&mut buf, 20, &(functions.len() as u32).to_le_bytes());
    put(&mut buf, 24, &(names.len() as u32).to_le_bytes());
    put(&mut buf, 28, &(base_rva + functions_at as u32).to_le_bytes());
    put(&mut buf, 32, &(base_rva + names_at as u32).to_le_bytes());
    put(&mut buf, 36, &(base_rva + ordinals_at as u32).to_le_bytes());
    buf.resize(pos, 0);
    let size = buf.len() as u32;
    (buf, size)
}

/// A COFF object (no DOS stub) with one section, symbols and a string table.
///
/// Each symbol is `(name, value, section_number, storage_class, aux_count)`.
pub fn coff_object(symbols: &[(&str, u32, i16, u8, u8)]) -> Vec<u8> {
    let mut out = Vec::new();
    put(&mut out, 0, &0x8664u16.to_le_bytes());
    put(&mut out, 2, &1u16.to_le_bytes());

    let section_at = 20;
    let raw_at = section_at + 40;
    let code = [0xC3u8; 16];
    let symtab_at = raw_at + code.len();

    put(&mut out, section_at, b".text\0\0\0");
    put(&mut out, section_at + 16, &(code.len() as u32).to_le_bytes());
    put(&mut out, section_at + 20, &(raw_at as u32).to_le_bytes());
    put(&mut out, section_at + 36, &0x6050_0020u32.to_le_bytes());
    put(&mut out, raw_at, &code);

    let mut strings = Vec::new();
    let mut records = 0u32;
    let mut pos = symtab_at;
    for &(name, value, section, class, aux) in symbols {
        let mut record = [0u8; 18];
        if name.len() <= 8 {
            record[..name.len()].copy_from_slice(name.as_bytes());
        } else {
            let offset = 4 + strings.len() as u32;
            record[4..8].copy_from_slice(&offset.to_le_bytes());
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }
        record[8..12].copy_from_slice(&value.to_le_bytes());
        record[12..14].copy_from_slice(&section.to_le_bytes());
        record[16] = class;
        record[17] = aux;
        put(&mut out, pos, &record);
        pos += 18;
        records += 1;
        for _ in 0..aux {
            put(&mut out, pos, &[0xAA; 18]);
            pos += 18;
            records += 1;
        }
    }
    put(&mut out, pos, &(4 + strings.len() as u32).to_le_bytes());
    put(&mut out, pos + 4, &strings);

    put(&mut out, 8, &(symtab_at as u32).to_le_bytes());
    put(&mut out, 12, &records.to_le_bytes());
    out
}

/// One stored ZIP member plus the extras it should carry.
#[derive(Debug, Clone, Default)]
pub struct ZipMember {
    pub name: String,
    pub data: Vec<u8>,
    pub method: u16,
    pub flags: u16,
    pub extra: Vec<u8>,
    pub comment: String,
    /// Write these fields as 0xFFFFFFFF and append a Zip64 extra.
    pub zip64: bool,
}

impl ZipMember {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            ..Self::default()
        }
    }
}

pub fn extra_field(tag: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = tag.to_le_bytes().to_vec();
    v.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    v.extend_from_slice(payload);
    v
}

pub const DOS_TIME: u16 = 0x6000; // 12:00:00
pub const DOS_DATE: u16 = 0x5021; // 2020-01-01

/// Build an archive. With `zip64_end` the end record is saturated and the
/// real counts live in Zip64 end-of-directory records.
pub fn build_zip(members: &[ZipMember], comment: &str, zip64_end: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let mut directory = Vec::new();

    for member in members {
        let offset = out.len() as u64;
        let size = member.data.len() as u64;

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&member.flags.to_le_bytes());
        out.extend_from_slice(&member.method.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(size as u32).to_le_bytes());
        out.extend_from_slice(&(size as u32).to_le_bytes());
        out.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(member.name.as_bytes());
        out.extend_from_slice(&member.data);

        let mut extra = Vec::new();
        let (csize, usize_, lho) = if member.zip64 {
            let mut payload = Vec::new();
            payload.extend_from_slice(&size.to_le_bytes());
            payload.extend_from_slice(&size.to_le_bytes());
            payload.extend_from_slice(&offset.to_le_bytes());
            extra.extend(extra_field(0x0001, &payload));
            (u32::MAX, u32::MAX, u32::MAX)
        } else {
            (size as u32, size as u32, offset as u32)
        };
        extra.extend_from_slice(&member.extra);

        directory.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        directory.extend_from_slice(&0x031Eu16.to_le_bytes());
        directory.extend_from_slice(&20u16.to_le_bytes());
        directory.extend_from_slice(&member.flags.to_le_bytes());
        directory.extend_from_slice(&member.method.to_le_bytes());
        directory.extend_from_slice(&DOS_TIME.to_le_bytes());
        directory.extend_from_slice(&DOS_DATE.to_le_bytes());
        directory.extend_from_slice(&0u32.to_le_bytes());
        directory.extend_from_slice(&csize.to_le_bytes());
        directory.extend_from_slice(&usize_.to_le_bytes());
        directory.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
        directory.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        directory.extend_from_slice(&(member.comment.len() as u16).to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&0u16.to_le_bytes());
        directory.extend_from_slice(&(0o100644u32 << 16).to_le_bytes());
        directory.extend_from_slice(&lho.to_le_bytes());
        directory.extend_from_slice(member.name.as_bytes());
        directory.extend_from_slice(&extra);
        directory.extend_from_slice(member.comment.as_bytes());
    }

    let directory_offset = out.len() as u64;
    let directory_size = directory.len() as u64;
    let count = members.len() as u64;
    out.extend_from_slice(&directory);

    if zip64_end {
        let zip64_offset = out.len() as u64;
        out.extend_from_slice(&0x0606_4b50u32.to_le_bytes());
        out.extend_from_slice(&44u64.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&directory_size.to_le_bytes());
        out.extend_from_slice(&directory_offset.to_le_bytes());

        out.extend_from_slice(&0x0706_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&zip64_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
    }

    let (records, size, offset) = if zip64_end {
        (u16::MAX, u32::MAX, u32::MAX)
    } else {
        (count as u16, directory_size as u32, directory_offset as u32)
    };
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    out.extend_from_slice(comment.as_bytes());
    out
}
