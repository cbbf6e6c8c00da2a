//! Plugin image loader.

use super::format::{
    c_str_at, read_pair, section, slice_at, CodeHeader, Compression, DataHeader, DebugInfoHeader,
    FileHeader, SectionEntry, SymbolRecord, CODE_FLAG_DEBUG, SPFILE_MAGIC,
};
use crate::debug::{ArrayDim, DebugFile, DebugLine, DebugSymbol, DebugTables};
use crate::error::{SpError, SpResult};
use crate::symbols::{PubvarInfo, PublicInfo, SymbolTables};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Backing storage of a loaded image.
#[derive(Debug, Clone)]
enum ImageBuffer {
    /// Allocated by the loader.
    Owned(Vec<u8>),
    /// Supplied by the host and never copied.
    Shared(Arc<[u8]>),
}

impl ImageBuffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            ImageBuffer::Owned(v) => v,
            ImageBuffer::Shared(a) => a,
        }
    }
}

/// An entry of the section directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionInfo {
    pub name: String,
    pub data_offset: u32,
    pub size: u32,
}

/// A parsed, immutable plugin image.
#[derive(Debug, Clone)]
pub struct PluginImage {
    buffer: ImageBuffer,
    header: FileHeader,
    sections: Vec<SectionInfo>,
    code_header: CodeHeader,
    code: Range<usize>,
    data_header: DataHeader,
    data: Range<usize>,
    symbols: SymbolTables,
    natives: Vec<String>,
    debug: Option<DebugTables>,
}

/// First occurrence of each recognised section.
#[derive(Default)]
struct SectionMap<'a> {
    code: Option<(usize, &'a [u8])>,
    data: Option<(usize, &'a [u8])>,
    publics: Option<&'a [u8]>,
    pubvars: Option<&'a [u8]>,
    natives: Option<&'a [u8]>,
    names: Option<&'a [u8]>,
    dbg_info: Option<&'a [u8]>,
    dbg_files: Option<&'a [u8]>,
    dbg_lines: Option<&'a [u8]>,
    dbg_symbols: Option<&'a [u8]>,
    dbg_strings: Option<&'a [u8]>,
}

fn first<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn read_header(bytes: &[u8]) -> SpResult<(FileHeader, Compression)> {
    let header = FileHeader::read(bytes)?;
    if header.magic != SPFILE_MAGIC {
        return Err(SpError::FileFormat);
    }
    let compression = Compression::from_u8(header.compression).ok_or(SpError::Decompressor)?;
    Ok((header, compression))
}

/// Inflate a zlib stream, requiring exactly `expected` output bytes.
fn inflate_into(compressed: &[u8], expected: usize, out: &mut Vec<u8>) -> SpResult<()> {
    let start = out.len();
    ZlibDecoder::new(compressed)
        .take(expected as u64 + 1)
        .read_to_end(out)
        .map_err(|_| SpError::Decompressor)?;
    if out.len() - start != expected {
        return Err(SpError::Decompressor);
    }
    Ok(())
}

/// Read exactly `len` bytes from `reader` onto the end of `out`.
fn read_exactly<R: Read>(reader: &mut R, len: usize, out: &mut Vec<u8>, err: SpError) -> SpResult<()> {
    let start = out.len();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(out)
        .map_err(|_| err)?;
    if out.len() - start != len {
        return Err(err);
    }
    Ok(())
}

impl PluginImage {
    /// Load an image from a file on disk.
    pub fn load_file(path: &Path) -> SpResult<Self> {
        let file = File::open(path).map_err(|_| SpError::NotFound)?;
        debug!(path = %path.display(), "Loading plugin image");
        Self::load_reader(BufReader::new(file))
    }

    /// Load an image from any byte stream.
    pub fn load_reader<R: Read>(mut reader: R) -> SpResult<Self> {
        let mut base = Vec::with_capacity(FileHeader::SIZE);
        read_exactly(&mut reader, FileHeader::SIZE, &mut base, SpError::FileFormat)?;
        let (header, compression) = read_header(&base)?;

        let image_size = header.image_size as usize;
        let data_offset = header.data_offset as usize;
        match compression {
            Compression::None => {
                let rest = image_size
                    .checked_sub(FileHeader::SIZE)
                    .ok_or(SpError::FileFormat)?;
                read_exactly(&mut reader, rest, &mut base, SpError::FileFormat)?;
            }
            Compression::Gzip => {
                if data_offset < FileHeader::SIZE || data_offset > image_size {
                    return Err(SpError::FileFormat);
                }
                read_exactly(
                    &mut reader,
                    data_offset - FileHeader::SIZE,
                    &mut base,
                    SpError::FileFormat,
                )?;
                let compressed_size = (header.disk_size as usize)
                    .checked_sub(data_offset)
                    .ok_or(SpError::FileFormat)?;
                let mut compressed = Vec::new();
                read_exactly(&mut reader, compressed_size, &mut compressed, SpError::Decompressor)?;
                inflate_into(&compressed, image_size - data_offset, &mut base)?;
            }
        }

        Self::parse(header, ImageBuffer::Owned(base))
    }

    /// Load an image from an owned byte buffer.
    pub fn load_bytes(bytes: Vec<u8>) -> SpResult<Self> {
        let (header, compression) = read_header(&bytes)?;
        match compression {
            Compression::None => Self::parse(header, ImageBuffer::Owned(bytes)),
            Compression::Gzip => Self::load_reader(bytes.as_slice()),
        }
    }

    /// Load an image from a host-owned buffer.
    ///
    /// Uncompressed buffers are used in place and reported as external.
    /// Compressed buffers must be inflated and therefore become owned.
    pub fn load_shared(buffer: Arc<[u8]>) -> SpResult<Self> {
        let (header, compression) = read_header(&buffer)?;
        match compression {
            Compression::None => Self::parse(header, ImageBuffer::Shared(buffer)),
            Compression::Gzip => Self::load_reader(&buffer[..]),
        }
    }

    fn parse(header: FileHeader, buffer: ImageBuffer) -> SpResult<Self> {
        let base = buffer.as_slice();
        let mut map = SectionMap::default();
        let mut sections = Vec::with_capacity(header.sections as usize);

        for i in 0..header.sections as usize {
            let entry_pos = FileHeader::SIZE + i * SectionEntry::SIZE;
            let entry = SectionEntry::read(slice_at(base, entry_pos, SectionEntry::SIZE)?)?;
            let name_pos = (header.string_table as usize)
                .checked_add(entry.name_offset as usize)
                .ok_or(SpError::FileFormat)?;
            let name = c_str_at(base, name_pos)?;
            let start = entry.data_offset as usize;
            let body = slice_at(base, start, entry.size as usize)?;

            match name {
                section::CODE => first(&mut map.code, (start, body)),
                section::DATA => first(&mut map.data, (start, body)),
                section::PUBLICS => first(&mut map.publics, body),
                section::PUBVARS => first(&mut map.pubvars, body),
                section::NATIVES => first(&mut map.natives, body),
                section::NAMES => first(&mut map.names, body),
                section::DBG_INFO => first(&mut map.dbg_info, body),
                section::DBG_FILES => first(&mut map.dbg_files, body),
                section::DBG_LINES => first(&mut map.dbg_lines, body),
                section::DBG_SYMBOLS => first(&mut map.dbg_symbols, body),
                section::DBG_STRINGS => first(&mut map.dbg_strings, body),
                _ => {}
            }

            sections.push(SectionInfo {
                name: name.to_string(),
                data_offset: entry.data_offset,
                size: entry.size,
            });
        }

        let (code_start, code_body) = map.code.ok_or(SpError::FileFormat)?;
        let (data_start, data_body) = map.data.ok_or(SpError::FileFormat)?;
        let names = map.names.ok_or(SpError::FileFormat)?;

        let code_header = CodeHeader::read(code_body)?;
        let code_pos = code_start + code_header.code as usize;
        let code = code_pos..code_pos + code_header.code_size as usize;
        slice_at(base, code.start, code.len())?;

        let data_header = DataHeader::read(data_body)?;
        if data_header.data_size > data_header.mem_size {
            return Err(SpError::FileFormat);
        }
        let data_pos = data_start + data_header.data as usize;
        let data = data_pos..data_pos + data_header.data_size as usize;
        slice_at(base, data.start, data.len())?;

        let publics = decode_pairs(map.publics)?
            .into_iter()
            .map(|(code_offset, name)| {
                Ok(PublicInfo {
                    code_offset,
                    name: c_str_at(names, name as usize)?.to_string(),
                })
            })
            .collect::<SpResult<Vec<_>>>()?;
        let pubvars = decode_pairs(map.pubvars)?
            .into_iter()
            .map(|(offset, name)| {
                Ok(PubvarInfo {
                    offset,
                    name: c_str_at(names, name as usize)?.to_string(),
                })
            })
            .collect::<SpResult<Vec<_>>>()?;
        let natives = decode_natives(map.natives, names)?;

        let debug = if code_header.flags & CODE_FLAG_DEBUG != 0 {
            Some(decode_debug(&map)?)
        } else {
            None
        };

        let has_debug = debug.is_some();
        debug!(
            sections = sections.len(),
            code_size = code.len(),
            data_size = data.len(),
            memory = data_header.mem_size,
            publics = publics.len(),
            natives = natives.len(),
            debug = has_debug,
            "Parsed plugin image"
        );

        Ok(Self {
            header,
            sections,
            code_header,
            code,
            data_header,
            data,
            symbols: SymbolTables::new(publics, pubvars),
            natives,
            debug,
            buffer,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn compression(&self) -> Compression {
        Compression::from_u8(self.header.compression).unwrap_or_default()
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    /// The full uncompressed image.
    pub fn base(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Whether the base buffer belongs to the host.
    pub fn is_base_external(&self) -> bool {
        matches!(self.buffer, ImageBuffer::Shared(_))
    }

    pub fn code_header(&self) -> &CodeHeader {
        &self.code_header
    }

    pub fn code(&self) -> &[u8] {
        &self.base()[self.code.clone()]
    }

    pub fn code_flags(&self) -> u16 {
        self.code_header.flags
    }

    pub fn main_entry(&self) -> u32 {
        self.code_header.main
    }

    pub fn data_header(&self) -> &DataHeader {
        &self.data_header
    }

    /// Initial contents of the global data region.
    pub fn data(&self) -> &[u8] {
        &self.base()[self.data.clone()]
    }

    /// Total arena size requested by the image.
    pub fn memory_size(&self) -> u32 {
        self.data_header.mem_size
    }

    pub fn symbols(&self) -> &SymbolTables {
        &self.symbols
    }

    /// Native names in slot order.
    pub fn natives(&self) -> &[String] {
        &self.natives
    }

    /// Debug tables, present when the image was built with debug info.
    pub fn debug(&self) -> Option<&DebugTables> {
        self.debug.as_ref()
    }
}

fn decode_pairs(body: Option<&[u8]>) -> SpResult<Vec<(u32, u32)>> {
    let Some(body) = body else {
        return Ok(Vec::new());
    };
    (0..body.len() / 8).map(|i| read_pair(body, i * 8)).collect()
}

fn decode_natives(body: Option<&[u8]>, names: &[u8]) -> SpResult<Vec<String>> {
    let Some(body) = body else {
        return Ok(Vec::new());
    };
    body.chunks_exact(4)
        .map(|mut chunk| {
            let name = chunk
                .read_u32::<LittleEndian>()
                .map_err(|_| SpError::FileFormat)?;
            Ok(c_str_at(names, name as usize)?.to_string())
        })
        .collect()
}

fn decode_debug(map: &SectionMap<'_>) -> SpResult<DebugTables> {
    let (files, lines, symbols) = match (map.dbg_files, map.dbg_lines, map.dbg_symbols) {
        (Some(f), Some(l), Some(s)) => (f, l, s),
        _ => return Err(SpError::FileFormat),
    };
    let info = match map.dbg_info {
        Some(body) => DebugInfoHeader::read(body)?,
        None => DebugInfoHeader::default(),
    };
    let strings = map.dbg_strings.unwrap_or(&[]);

    let files = (0..info.num_files as usize)
        .map(|i| {
            let (addr, name) = read_pair(files, i * 8)?;
            Ok(DebugFile {
                addr,
                name: c_str_at(strings, name as usize)?.to_string(),
            })
        })
        .collect::<SpResult<Vec<_>>>()?;

    let lines = (0..info.num_lines as usize)
        .map(|i| {
            let (addr, line) = read_pair(lines, i * 8)?;
            Ok(DebugLine { addr, line })
        })
        .collect::<SpResult<Vec<_>>>()?;

    let mut offset = 0;
    let mut decoded = Vec::with_capacity(info.num_syms as usize);
    for _ in 0..info.num_syms {
        let record = SymbolRecord::read(slice_at(symbols, offset, SymbolRecord::SIZE)?)?;
        offset += SymbolRecord::SIZE;
        let mut dims = Vec::with_capacity(record.dim_count as usize);
        for _ in 0..record.dim_count {
            let mut raw = slice_at(symbols, offset, SymbolRecord::DIM_SIZE)?;
            let tag_id = raw
                .read_i16::<LittleEndian>()
                .map_err(|_| SpError::FileFormat)?;
            let size = raw
                .read_u32::<LittleEndian>()
                .map_err(|_| SpError::FileFormat)?;
            dims.push(ArrayDim { tag_id, size });
            offset += SymbolRecord::DIM_SIZE;
        }
        decoded.push(DebugSymbol {
            addr: record.addr,
            tag_id: record.tag_id,
            code_start: record.code_start,
            code_end: record.code_end,
            ident: record.ident,
            vclass: record.vclass,
            name: c_str_at(strings, record.name as usize)?.to_string(),
            dims,
        });
    }

    Ok(DebugTables {
        files,
        lines,
        symbols: decoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;

    fn sample(compression: Compression) -> Vec<u8> {
        ImageBuilder::new()
            .code(vec![0xAA; 32])
            .data(vec![1, 2, 3, 4, 5, 6, 7, 8], 1024)
            .public("OnPluginStart", 8)
            .native("PrintToServer")
            .compression(compression)
            .build()
            .unwrap()
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample(Compression::None);
        bytes[0] ^= 0xFF;
        assert_eq!(
            PluginImage::load_bytes(bytes).unwrap_err(),
            SpError::FileFormat
        );
    }

    #[test]
    fn test_unknown_compression() {
        let mut bytes = sample(Compression::None);
        bytes[6] = 7;
        assert_eq!(
            PluginImage::load_bytes(bytes).unwrap_err(),
            SpError::Decompressor
        );
    }

    #[test]
    fn test_corrupt_payload_is_decompressor() {
        let mut bytes = sample(Compression::Gzip);
        let data_offset = FileHeader::read(&bytes).unwrap().data_offset as usize;
        for b in &mut bytes[data_offset..] {
            *b = 0x5A;
        }
        assert_eq!(
            PluginImage::load_bytes(bytes).unwrap_err(),
            SpError::Decompressor
        );
    }

    #[test]
    fn test_truncated_image() {
        let bytes = sample(Compression::None);
        let truncated = bytes[..bytes.len() - 4].to_vec();
        assert_eq!(
            PluginImage::load_reader(truncated.as_slice()).unwrap_err(),
            SpError::FileFormat
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = PluginImage::load_file(Path::new("/nonexistent/plugin.smx")).unwrap_err();
        assert_eq!(err, SpError::NotFound);
    }

    #[test]
    fn test_shared_buffer_is_external() {
        let shared: Arc<[u8]> = sample(Compression::None).into();
        let image = PluginImage::load_shared(shared).unwrap();
        assert!(image.is_base_external());
        assert_eq!(image.code(), &[0xAA; 32][..]);

        let shared: Arc<[u8]> = sample(Compression::Gzip).into();
        let image = PluginImage::load_shared(shared).unwrap();
        assert!(!image.is_base_external());
    }

    #[test]
    fn test_missing_names_is_file_format() {
        let bytes = ImageBuilder::new()
            .code(vec![0; 4])
            .data(vec![], 256)
            .omit_section(section::NAMES)
            .build()
            .unwrap();
        assert_eq!(
            PluginImage::load_bytes(bytes).unwrap_err(),
            SpError::FileFormat
        );
    }

    #[test]
    fn test_debug_flag_requires_tables() {
        let bytes = ImageBuilder::new()
            .code(vec![0; 4])
            .data(vec![], 256)
            .debug(DebugTables::default())
            .omit_section(section::DBG_LINES)
            .build()
            .unwrap();
        assert_eq!(
            PluginImage::load_bytes(bytes).unwrap_err(),
            SpError::FileFormat
        );
    }
}
