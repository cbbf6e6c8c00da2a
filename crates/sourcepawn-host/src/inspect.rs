//! Human- and machine-readable summaries of plugin images.

use serde::Serialize;
use sourcepawn_runtime::image::SectionInfo;
use sourcepawn_runtime::PluginImage;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct HeaderSummary {
    pub magic: String,
    pub version: String,
    pub compression: String,
    pub disk_size: u32,
    pub image_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSummary {
    pub name: String,
    pub address: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSummary {
    pub files: usize,
    pub lines: usize,
    pub symbols: usize,
}

/// Everything `spvm inspect` shows about an image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub header: HeaderSummary,
    pub sections: Vec<SectionInfo>,
    pub code_size: usize,
    pub data_size: usize,
    pub memory_size: u32,
    pub main: u32,
    pub publics: Vec<SymbolSummary>,
    pub pubvars: Vec<SymbolSummary>,
    pub natives: Vec<String>,
    pub debug: Option<DebugSummary>,
}

impl ImageSummary {
    pub fn from_image(image: &PluginImage) -> Self {
        let header = image.header();
        let symbols = image.symbols();
        Self {
            header: HeaderSummary {
                magic: format!("{:#010x}", header.magic),
                version: format!("{:#06x}", header.version),
                compression: format!("{:?}", image.compression()).to_lowercase(),
                disk_size: header.disk_size,
                image_size: header.image_size,
            },
            sections: image.sections().to_vec(),
            code_size: image.code().len(),
            data_size: image.data().len(),
            memory_size: image.memory_size(),
            main: image.main_entry(),
            publics: symbols
                .publics()
                .iter()
                .map(|p| SymbolSummary {
                    name: p.name.clone(),
                    address: p.code_offset,
                })
                .collect(),
            pubvars: symbols
                .pubvars()
                .iter()
                .map(|p| SymbolSummary {
                    name: p.name.clone(),
                    address: p.offset,
                })
                .collect(),
            natives: image.natives().to_vec(),
            debug: image.debug().map(|d| DebugSummary {
                files: d.files.len(),
                lines: d.lines.len(),
                symbols: d.symbols.len(),
            }),
        }
    }

    /// Plain-text rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let h = &self.header;
        let _ = writeln!(out, "magic:        {}", h.magic);
        let _ = writeln!(out, "version:      {}", h.version);
        let _ = writeln!(out, "compression:  {}", h.compression);
        let _ = writeln!(out, "disk size:    {}", h.disk_size);
        let _ = writeln!(out, "image size:   {}", h.image_size);
        let _ = writeln!(out, "code:         {} bytes, main at {:#x}", self.code_size, self.main);
        let _ = writeln!(out, "data:         {} of {} bytes", self.data_size, self.memory_size);

        let _ = writeln!(out, "\nsections ({}):", self.sections.len());
        for s in &self.sections {
            let _ = writeln!(out, "  {:<14} offset {:#08x}  size {}", s.name, s.data_offset, s.size);
        }

        let _ = writeln!(out, "\npublics ({}):", self.publics.len());
        for p in &self.publics {
            let _ = writeln!(out, "  {:#08x}  {}", p.address, p.name);
        }

        let _ = writeln!(out, "\npubvars ({}):", self.pubvars.len());
        for p in &self.pubvars {
            let _ = writeln!(out, "  {:#08x}  {}", p.address, p.name);
        }

        let _ = writeln!(out, "\nnatives ({}):", self.natives.len());
        for n in &self.natives {
            let _ = writeln!(out, "  {}", n);
        }

        match &self.debug {
            Some(d) => {
                let _ = writeln!(
                    out,
                    "\ndebug: {} files, {} lines, {} symbols",
                    d.files, d.lines, d.symbols
                );
            }
            None => {
                let _ = writeln!(out, "\ndebug: none");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcepawn_runtime::{Compression, ImageBuilder};

    fn image() -> PluginImage {
        let bytes = ImageBuilder::new()
            .code(vec![0; 16])
            .main(8)
            .data(vec![0; 8], 512)
            .public("OnPluginStart", 4)
            .pubvar("myinfo", 0)
            .native("PrintToServer")
            .compression(Compression::Gzip)
            .build()
            .unwrap();
        PluginImage::load_bytes(bytes).unwrap()
    }

    #[test]
    fn test_summary_fields() {
        let summary = ImageSummary::from_image(&image());
        assert_eq!(summary.header.magic, "0x53504646");
        assert_eq!(summary.header.version, "0x0101");
        assert_eq!(summary.header.compression, "gzip");
        assert_eq!(summary.code_size, 16);
        assert_eq!(summary.memory_size, 512);
        assert_eq!(summary.publics[0].name, "OnPluginStart");
        assert_eq!(summary.natives, vec!["PrintToServer".to_string()]);
        assert!(summary.debug.is_none());
    }

    #[test]
    fn test_text_and_json() {
        let summary = ImageSummary::from_image(&image());
        let text = summary.render_text();
        assert!(text.contains("OnPluginStart"));
        assert!(text.contains("debug: none"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["pubvars"][0]["name"], "myinfo");
        assert_eq!(json["main"], 8);
        assert_eq!(json["debug"], serde_json::Value::Null);
    }
}
