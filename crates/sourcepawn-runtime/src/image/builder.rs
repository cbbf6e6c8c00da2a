//! Encoder producing SPFF images, used by tooling and tests.

use super::format::{
    section, CodeHeader, Compression, DataHeader, DebugInfoHeader, FileHeader, SectionEntry,
    SymbolRecord, CODE_FLAG_DEBUG, SPFILE_MAGIC, SPFILE_VERSION,
};
use crate::debug::DebugTables;
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use std::io::{self, Write};

/// NUL-separated string pool with stable offsets.
#[derive(Default)]
struct StringPool {
    bytes: Vec<u8>,
}

impl StringPool {
    fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }
}

/// Builder for plugin images.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    code: Vec<u8>,
    main: u32,
    data: Vec<u8>,
    mem_size: u32,
    publics: Vec<(String, u32)>,
    pubvars: Vec<(String, u32)>,
    natives: Vec<String>,
    debug: Option<DebugTables>,
    compression: Compression,
    omitted: Vec<String>,
    extra: Vec<(String, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    pub fn main(mut self, main: u32) -> Self {
        self.main = main;
        self
    }

    /// Initial globals plus the total arena size.
    pub fn data(mut self, data: Vec<u8>, mem_size: u32) -> Self {
        self.data = data;
        self.mem_size = mem_size;
        self
    }

    pub fn public(mut self, name: &str, code_offset: u32) -> Self {
        self.publics.push((name.to_string(), code_offset));
        self
    }

    pub fn pubvar(mut self, name: &str, offset: u32) -> Self {
        self.pubvars.push((name.to_string(), offset));
        self
    }

    pub fn native(mut self, name: &str) -> Self {
        self.natives.push(name.to_string());
        self
    }

    /// Attach debug tables and set the debug flag.
    pub fn debug(mut self, tables: DebugTables) -> Self {
        self.debug = Some(tables);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Leave a standard section out of the directory.
    pub fn omit_section(mut self, name: &str) -> Self {
        self.omitted.push(name.to_string());
        self
    }

    /// Append an arbitrary section after the standard ones.
    pub fn raw_section(mut self, name: &str, body: Vec<u8>) -> Self {
        self.extra.push((name.to_string(), body));
        self
    }

    fn sections(&self) -> Vec<(String, Vec<u8>)> {
        let mut publics = self.publics.clone();
        publics.sort_by(|a, b| a.0.cmp(&b.0));
        let mut pubvars = self.pubvars.clone();
        pubvars.sort_by(|a, b| a.0.cmp(&b.0));
        let mut natives = self.natives.clone();
        natives.sort();

        let mut names = StringPool::default();
        let mut pub_body = Vec::new();
        for (name, addr) in &publics {
            let _ = pub_body.write_u32::<LittleEndian>(*addr);
            let _ = pub_body.write_u32::<LittleEndian>(names.add(name));
        }
        let mut var_body = Vec::new();
        for (name, addr) in &pubvars {
            let _ = var_body.write_u32::<LittleEndian>(*addr);
            let _ = var_body.write_u32::<LittleEndian>(names.add(name));
        }
        let mut nat_body = Vec::new();
        for name in &natives {
            let _ = nat_body.write_u32::<LittleEndian>(names.add(name));
        }

        let mut code = Vec::with_capacity(CodeHeader::SIZE + self.code.len());
        CodeHeader {
            code_size: self.code.len() as u32,
            cell_size: 4,
            code_version: 9,
            flags: if self.debug.is_some() { CODE_FLAG_DEBUG } else { 0 },
            main: self.main,
            code: CodeHeader::SIZE as u32,
        }
        .write(&mut code);
        code.extend_from_slice(&self.code);

        let mut data = Vec::with_capacity(DataHeader::SIZE + self.data.len());
        DataHeader {
            data_size: self.data.len() as u32,
            mem_size: self.mem_size,
            data: DataHeader::SIZE as u32,
        }
        .write(&mut data);
        data.extend_from_slice(&self.data);

        let mut out = vec![
            (section::CODE.to_string(), code),
            (section::DATA.to_string(), data),
            (section::PUBLICS.to_string(), pub_body),
            (section::PUBVARS.to_string(), var_body),
            (section::NATIVES.to_string(), nat_body),
            (section::NAMES.to_string(), names.bytes),
        ];
        if let Some(debug) = &self.debug {
            out.extend(encode_debug(debug));
        }
        out.extend(self.extra.iter().cloned());
        out.retain(|(name, _)| !self.omitted.contains(name));
        out
    }

    /// Encode the image.
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let sections = self.sections();

        let mut section_names = StringPool::default();
        let name_offsets: Vec<u32> = sections
            .iter()
            .map(|(name, _)| section_names.add(name))
            .collect();

        let string_table = FileHeader::SIZE + sections.len() * SectionEntry::SIZE;
        let data_offset = string_table + section_names.bytes.len();

        let mut directory = Vec::with_capacity(sections.len() * SectionEntry::SIZE);
        let mut payload = Vec::new();
        for ((_, body), name_offset) in sections.iter().zip(&name_offsets) {
            SectionEntry {
                name_offset: *name_offset,
                data_offset: (data_offset + payload.len()) as u32,
                size: body.len() as u32,
            }
            .write(&mut directory);
            payload.extend_from_slice(body);
        }

        let image_size = data_offset + payload.len();
        let stored = match self.compression {
            Compression::None => payload,
            Compression::Gzip => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&payload)?;
                encoder.finish()?
            }
        };

        let mut out = Vec::with_capacity(data_offset + stored.len());
        FileHeader {
            magic: SPFILE_MAGIC,
            version: SPFILE_VERSION,
            compression: self.compression as u8,
            disk_size: (data_offset + stored.len()) as u32,
            image_size: image_size as u32,
            sections: sections.len() as u8,
            string_table: string_table as u32,
            data_offset: data_offset as u32,
        }
        .write(&mut out);
        out.extend_from_slice(&directory);
        out.extend_from_slice(&section_names.bytes);
        out.extend_from_slice(&stored);
        Ok(out)
    }
}

fn encode_debug(debug: &DebugTables) -> Vec<(String, Vec<u8>)> {
    let mut strings = StringPool::default();

    let mut files = Vec::new();
    for file in &debug.files {
        let _ = files.write_u32::<LittleEndian>(file.addr);
        let _ = files.write_u32::<LittleEndian>(strings.add(&file.name));
    }

    let mut lines = Vec::new();
    for line in &debug.lines {
        let _ = lines.write_u32::<LittleEndian>(line.addr);
        let _ = lines.write_u32::<LittleEndian>(line.line);
    }

    let mut symbols = Vec::new();
    let mut num_arrays = 0;
    for sym in &debug.symbols {
        SymbolRecord {
            addr: sym.addr,
            tag_id: sym.tag_id,
            code_start: sym.code_start,
            code_end: sym.code_end,
            ident: sym.ident,
            vclass: sym.vclass,
            dim_count: sym.dims.len() as u16,
            name: strings.add(&sym.name),
        }
        .write(&mut symbols);
        for dim in &sym.dims {
            let _ = symbols.write_i16::<LittleEndian>(dim.tag_id);
            let _ = symbols.write_u32::<LittleEndian>(dim.size);
        }
        if !sym.dims.is_empty() {
            num_arrays += 1;
        }
    }

    let mut info = Vec::with_capacity(DebugInfoHeader::SIZE);
    DebugInfoHeader {
        num_files: debug.files.len() as u32,
        num_lines: debug.lines.len() as u32,
        num_syms: debug.symbols.len() as u32,
        num_arrays,
    }
    .write(&mut info);

    vec![
        (section::DBG_INFO.to_string(), info),
        (section::DBG_FILES.to_string(), files),
        (section::DBG_LINES.to_string(), lines),
        (section::DBG_SYMBOLS.to_string(), symbols),
        (section::DBG_STRINGS.to_string(), strings.bytes),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PluginImage;

    #[test]
    fn test_name_tables_are_sorted() {
        let bytes = ImageBuilder::new()
            .code(vec![0; 8])
            .data(vec![], 512)
            .native("Zeta")
            .native("Alpha")
            .native("Mid")
            .build()
            .unwrap();
        let image = PluginImage::load_bytes(bytes).unwrap();
        assert_eq!(image.natives(), &["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn test_first_duplicate_section_wins() {
        let bytes = ImageBuilder::new()
            .code(vec![1, 2, 3, 4])
            .data(vec![], 512)
            .raw_section(section::CODE, vec![0xFF; 32])
            .build()
            .unwrap();
        let image = PluginImage::load_bytes(bytes).unwrap();
        assert_eq!(image.code(), &[1, 2, 3, 4]);
        assert_eq!(image.sections().len(), 7);
    }

    #[test]
    fn test_compressed_disk_size_smaller() {
        let builder = ImageBuilder::new().code(vec![0; 4096]).data(vec![0; 4096], 16384);
        let plain = builder.clone().build().unwrap();
        let packed = builder.compression(Compression::Gzip).build().unwrap();
        assert!(packed.len() < plain.len());
        let header = FileHeader::read(&packed).unwrap();
        assert_eq!(header.disk_size as usize, packed.len());
        assert_eq!(header.image_size as usize, plain.len());
    }
}
