//! # sourcepawn-host
//!
//! Host-side collaborators for the SourcePawn runtime.
//!
//! This crate provides:
//! - Discovery of compiled plugins (`*.smx`) in well-known directories
//! - A plugin registry that loads images, binds host natives and tracks
//!   each plugin's display index and file name
//! - A debug listener that renders execution errors to the log
//! - Host configuration (`config.toml`)
//! - Image summaries for the `spvm` tool

pub mod config;
pub mod discovery;
pub mod error;
pub mod inspect;
pub mod registry;
pub mod reporter;

pub use config::HostConfig;
pub use discovery::{discover_plugin, discover_plugins, PluginPath};
pub use error::{HostError, HostResult};
pub use registry::{PluginDirectory, PluginInfo, PluginRegistry, PluginStatus};
pub use reporter::LogReporter;
