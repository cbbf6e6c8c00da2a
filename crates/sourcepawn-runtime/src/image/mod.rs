//! SPFF plugin images: wire format, loader and builder.

mod builder;
pub mod format;
mod loader;

pub use builder::ImageBuilder;
pub use format::Compression;
pub use loader::{PluginImage, SectionInfo};
