//! On-disk layout of the SPFF plugin image.
//!
//! ```text
//! +---------------------------+  0
//! | FileHeader (24 bytes)     |
//! +---------------------------+
//! | SectionEntry * sections   |  12 bytes each
//! +---------------------------+
//! | section name strings      |  header.string_table
//! +---------------------------+  header.data_offset (compression starts here)
//! | section payloads          |
//! +---------------------------+  header.image_size
//! ```
//!
//! All fields are little-endian and byte-packed.

use crate::error::{SpError, SpResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// "SPFF"
pub const SPFILE_MAGIC: u32 = 0x5350_4646;

/// Uncompressed bytecode version.
pub const SPFILE_VERSION: u16 = 0x0101;

/// `.code` flag: debug tables are present.
pub const CODE_FLAG_DEBUG: u16 = 1 << 0;

/// Symbol kinds stored in `.dbg.symbols`.
pub const SYMBOL_VARIABLE: u8 = 1;
pub const SYMBOL_REFERENCE: u8 = 2;
pub const SYMBOL_ARRAY: u8 = 3;
pub const SYMBOL_REFARRAY: u8 = 4;
pub const SYMBOL_FUNCTION: u8 = 9;

/// Section names recognised by the loader.
pub mod section {
    pub const CODE: &str = ".code";
    pub const DATA: &str = ".data";
    pub const PUBLICS: &str = ".publics";
    pub const PUBVARS: &str = ".pubvars";
    pub const NATIVES: &str = ".natives";
    pub const NAMES: &str = ".names";
    pub const DBG_INFO: &str = ".dbg.info";
    pub const DBG_FILES: &str = ".dbg.files";
    pub const DBG_LINES: &str = ".dbg.lines";
    pub const DBG_SYMBOLS: &str = ".dbg.symbols";
    pub const DBG_STRINGS: &str = ".dbg.strings";
}

/// Compression applied to everything past `data_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
}

impl Compression {
    pub fn from_u8(value: u8) -> Option<Compression> {
        match value {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            _ => None,
        }
    }
}

fn truncated(_: std::io::Error) -> SpError {
    SpError::FileFormat
}

/// Fixed image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u16,
    pub compression: u8,
    pub disk_size: u32,
    pub image_size: u32,
    pub sections: u8,
    pub string_table: u32,
    pub data_offset: u32,
}

impl FileHeader {
    pub const SIZE: usize = 24;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            magic: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            version: cur.read_u16::<LittleEndian>().map_err(truncated)?,
            compression: cur.read_u8().map_err(truncated)?,
            disk_size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            image_size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            sections: cur.read_u8().map_err(truncated)?,
            string_table: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            data_offset: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        let _ = out.write_u32::<LittleEndian>(self.magic);
        let _ = out.write_u16::<LittleEndian>(self.version);
        let _ = out.write_u8(self.compression);
        let _ = out.write_u32::<LittleEndian>(self.disk_size);
        let _ = out.write_u32::<LittleEndian>(self.image_size);
        let _ = out.write_u8(self.sections);
        let _ = out.write_u32::<LittleEndian>(self.string_table);
        let _ = out.write_u32::<LittleEndian>(self.data_offset);
    }
}

/// One entry of the section directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub name_offset: u32,
    pub data_offset: u32,
    pub size: u32,
}

impl SectionEntry {
    pub const SIZE: usize = 12;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            name_offset: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            data_offset: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let _ = out.write_u32::<LittleEndian>(self.name_offset);
        let _ = out.write_u32::<LittleEndian>(self.data_offset);
        let _ = out.write_u32::<LittleEndian>(self.size);
    }
}

/// Header at the start of the `.code` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHeader {
    pub code_size: u32,
    pub cell_size: u8,
    pub code_version: u8,
    pub flags: u16,
    pub main: u32,
    /// Offset of the code bytes relative to the section start.
    pub code: u32,
}

impl CodeHeader {
    pub const SIZE: usize = 16;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            code_size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            cell_size: cur.read_u8().map_err(truncated)?,
            code_version: cur.read_u8().map_err(truncated)?,
            flags: cur.read_u16::<LittleEndian>().map_err(truncated)?,
            main: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            code: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let _ = out.write_u32::<LittleEndian>(self.code_size);
        let _ = out.write_u8(self.cell_size);
        let _ = out.write_u8(self.code_version);
        let _ = out.write_u16::<LittleEndian>(self.flags);
        let _ = out.write_u32::<LittleEndian>(self.main);
        let _ = out.write_u32::<LittleEndian>(self.code);
    }
}

/// Header at the start of the `.data` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub data_size: u32,
    /// Total memory required, including the data.
    pub mem_size: u32,
    /// Offset of the data bytes relative to the section start.
    pub data: u32,
}

impl DataHeader {
    pub const SIZE: usize = 12;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            data_size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            mem_size: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            data: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let _ = out.write_u32::<LittleEndian>(self.data_size);
        let _ = out.write_u32::<LittleEndian>(self.mem_size);
        let _ = out.write_u32::<LittleEndian>(self.data);
    }
}

/// Contents of `.dbg.info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugInfoHeader {
    pub num_files: u32,
    pub num_lines: u32,
    pub num_syms: u32,
    pub num_arrays: u32,
}

impl DebugInfoHeader {
    pub const SIZE: usize = 16;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            num_files: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            num_lines: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            num_syms: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            num_arrays: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let _ = out.write_u32::<LittleEndian>(self.num_files);
        let _ = out.write_u32::<LittleEndian>(self.num_lines);
        let _ = out.write_u32::<LittleEndian>(self.num_syms);
        let _ = out.write_u32::<LittleEndian>(self.num_arrays);
    }
}

/// Packed `.dbg.symbols` record, excluding its trailing dimension records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRecord {
    pub addr: i32,
    pub tag_id: i16,
    pub code_start: u32,
    pub code_end: u32,
    pub ident: u8,
    pub vclass: u8,
    pub dim_count: u16,
    pub name: u32,
}

impl SymbolRecord {
    pub const SIZE: usize = 22;
    /// Size of one trailing `(tag_id i16, size u32)` dimension record.
    pub const DIM_SIZE: usize = 6;

    pub fn read(bytes: &[u8]) -> SpResult<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(Self {
            addr: cur.read_i32::<LittleEndian>().map_err(truncated)?,
            tag_id: cur.read_i16::<LittleEndian>().map_err(truncated)?,
            code_start: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            code_end: cur.read_u32::<LittleEndian>().map_err(truncated)?,
            ident: cur.read_u8().map_err(truncated)?,
            vclass: cur.read_u8().map_err(truncated)?,
            dim_count: cur.read_u16::<LittleEndian>().map_err(truncated)?,
            name: cur.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let _ = out.write_i32::<LittleEndian>(self.addr);
        let _ = out.write_i16::<LittleEndian>(self.tag_id);
        let _ = out.write_u32::<LittleEndian>(self.code_start);
        let _ = out.write_u32::<LittleEndian>(self.code_end);
        let _ = out.write_u8(self.ident);
        let _ = out.write_u8(self.vclass);
        let _ = out.write_u16::<LittleEndian>(self.dim_count);
        let _ = out.write_u32::<LittleEndian>(self.name);
    }
}

/// Checked sub-slice `[offset, offset + len)`.
pub(crate) fn slice_at(bytes: &[u8], offset: usize, len: usize) -> SpResult<&[u8]> {
    let end = offset.checked_add(len).ok_or(SpError::FileFormat)?;
    bytes.get(offset..end).ok_or(SpError::FileFormat)
}

/// Read a little-endian `u32` pair at `offset`.
pub(crate) fn read_pair(bytes: &[u8], offset: usize) -> SpResult<(u32, u32)> {
    let mut cur = Cursor::new(slice_at(bytes, offset, 8)?);
    let a = cur.read_u32::<LittleEndian>().map_err(truncated)?;
    let b = cur.read_u32::<LittleEndian>().map_err(truncated)?;
    Ok((a, b))
}

/// Read a NUL-terminated name starting at `offset`.
pub(crate) fn c_str_at(bytes: &[u8], offset: usize) -> SpResult<&str> {
    let tail = bytes.get(offset..).ok_or(SpError::FileFormat)?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(SpError::FileFormat)?;
    std::str::from_utf8(&tail[..len]).map_err(|_| SpError::FileFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_packed() {
        let header = FileHeader {
            magic: SPFILE_MAGIC,
            version: SPFILE_VERSION,
            compression: Compression::Gzip as u8,
            disk_size: 0x1122_3344,
            image_size: 0x5566_7788,
            sections: 7,
            string_table: 0x0000_0100,
            data_offset: 0x0000_0200,
        };
        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out.len(), FileHeader::SIZE);
        assert_eq!(&out[0..4], b"FFPS");
        assert_eq!(out[6], 1);
        assert_eq!(out[15], 7);
        assert_eq!(FileHeader::read(&out).unwrap(), header);
    }

    #[test]
    fn test_short_header_is_file_format() {
        assert_eq!(FileHeader::read(&[0u8; 10]), Err(SpError::FileFormat));
    }

    #[test]
    fn test_symbol_record_size() {
        let rec = SymbolRecord {
            addr: -8,
            tag_id: 3,
            code_start: 10,
            code_end: 40,
            ident: SYMBOL_FUNCTION,
            vclass: 0,
            dim_count: 0,
            name: 5,
        };
        let mut out = Vec::new();
        rec.write(&mut out);
        assert_eq!(out.len(), SymbolRecord::SIZE);
        assert_eq!(SymbolRecord::read(&out).unwrap(), rec);
    }

    #[test]
    fn test_c_str_requires_terminator() {
        assert_eq!(c_str_at(b"abc\0def", 0), Ok("abc"));
        assert_eq!(c_str_at(b"abc\0def", 4), Err(SpError::FileFormat));
        assert_eq!(c_str_at(b"abc", 9), Err(SpError::FileFormat));
    }
}
