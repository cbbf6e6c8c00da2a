//! Plugin discovery from well-known paths.
//!
//! Plugins are discovered from the following locations (in order):
//!
//! 1. A directory given by the caller (configuration or command line)
//! 2. `$XDG_DATA_HOME/sourcepawn/plugins/` (user plugins)
//! 3. `$XDG_DATA_DIRS/sourcepawn/plugins/` (system plugins)
//!
//! Each plugin is a single compiled `.smx` file. A file name found in an
//! earlier location hides the same name in later ones.

use crate::error::{HostError, HostResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension of compiled plugin files.
pub const PLUGIN_EXTENSION: &str = "smx";

/// A discovered plugin file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPath {
    /// Full path to the `.smx` file.
    pub path: PathBuf,

    /// File name, used as the plugin's display name.
    pub filename: String,
}

impl PluginPath {
    /// Size of the file on disk, if it can be read.
    pub fn size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// Get the user plugins directory.
pub fn user_plugins_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "raibid-labs", "sourcepawn")
        .map(|dirs| dirs.data_dir().join("plugins"))
}

/// Get the system plugins directories.
pub fn system_plugins_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(data_dirs) = std::env::var("XDG_DATA_DIRS") {
        for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
            let plugin_dir = PathBuf::from(dir).join("sourcepawn/plugins");
            if plugin_dir.exists() {
                dirs.push(plugin_dir);
            }
        }
    }

    let default_dirs = [
        "/usr/local/share/sourcepawn/plugins",
        "/usr/share/sourcepawn/plugins",
    ];

    for dir in default_dirs {
        let path = PathBuf::from(dir);
        if path.exists() && !dirs.contains(&path) {
            dirs.push(path);
        }
    }

    dirs
}

/// Discover all plugins, scanning `extra` first when given.
pub fn discover_plugins(extra: Option<&Path>) -> HostResult<Vec<PluginPath>> {
    let mut plugins = Vec::new();
    let mut seen = HashSet::new();

    if let Some(dir) = extra {
        debug!("Scanning plugins directory: {:?}", dir);
        discover_in_directory(dir, &mut plugins, &mut seen)?;
    }

    if let Some(user_dir) = user_plugins_dir() {
        debug!("Scanning user plugins directory: {:?}", user_dir);
        discover_in_directory(&user_dir, &mut plugins, &mut seen)?;
    }

    for sys_dir in system_plugins_dirs() {
        debug!("Scanning system plugins directory: {:?}", sys_dir);
        discover_in_directory(&sys_dir, &mut plugins, &mut seen)?;
    }

    info!("Discovered {} plugins", plugins.len());
    Ok(plugins)
}

/// Discover plugins in a specific directory, in file name order.
pub fn discover_in_directory(
    dir: &Path,
    plugins: &mut Vec<PluginPath>,
    seen: &mut HashSet<String>,
) -> HostResult<()> {
    if !dir.exists() {
        return Ok(());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to read plugins directory {:?}: {}", dir, e);
            return Ok(());
        }
    };

    let mut found: Vec<PluginPath> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_plugin_extension(path))
        .filter_map(|path| {
            let filename = path.file_name()?.to_str()?.to_string();
            Some(PluginPath { path, filename })
        })
        .collect();
    found.sort_by(|a, b| a.filename.cmp(&b.filename));

    for plugin in found {
        if !seen.insert(plugin.filename.clone()) {
            debug!("Skipping shadowed plugin: {:?}", plugin.path);
            continue;
        }
        debug!("Discovered plugin {} at {:?}", plugin.filename, plugin.path);
        plugins.push(plugin);
    }

    Ok(())
}

/// Describe a single plugin file.
pub fn discover_plugin(path: &Path) -> HostResult<PluginPath> {
    if !path.is_file() || !has_plugin_extension(path) {
        return Err(HostError::PluginNotFound(path.display().to_string()));
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HostError::PluginNotFound(path.display().to_string()))?
        .to_string();
    Ok(PluginPath {
        path: path.to_path_buf(),
        filename,
    })
}

fn has_plugin_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PLUGIN_EXTENSION))
}
