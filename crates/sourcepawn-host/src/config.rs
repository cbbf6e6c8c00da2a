//! Host configuration file loading.
//!
//! The configuration lives at `$XDG_CONFIG_HOME/sourcepawn/config.toml`.
//! If it doesn't exist, a default file with documented comments is created.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sourcepawn_runtime::RuntimeConfig;
use std::fs;
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Settings passed to the runtime
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Plugin loading
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plugin loading configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned before the user and system plugin directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Load every discovered plugin at startup
    /// Default: true
    pub autoload: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub level: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            autoload: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, creating a default
    /// file first if there is none.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/sourcepawn/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "sourcepawn")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> &'static str {
        r#"# SourcePawn Host Configuration

[runtime]
# Enable debug mode (call stack traces) for plugins compiled with debug info
# Default: false
debug = false

# Report stack and heap leaks after each successful call
# Default: true
report_leaks = true

[plugins]
# Directory scanned before the user and system plugin directories
# directory = "/path/to/plugins"

# Load every discovered plugin at startup
# Default: true
autoload = true

[logging]
# Log level: trace, debug, info, warn, error
# Default: "info"
level = "info"
"#
    }

    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level \"{}\": expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }
        if let Some(dir) = &self.plugins.directory {
            if dir.as_os_str().is_empty() {
                bail!("plugins.directory must not be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_content_parses_to_defaults() {
        let config = HostConfig::parse(HostConfig::default_config_content()).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = HostConfig::parse("").unwrap();
        assert!(config.plugins.autoload);
        assert!(config.runtime.report_leaks);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = HostConfig::parse(
            r#"
[runtime]
debug = true

[plugins]
directory = "/srv/game/addons/plugins"
autoload = false
"#,
        )
        .unwrap();
        assert!(config.runtime.debug);
        assert_eq!(
            config.plugins.directory,
            Some(PathBuf::from("/srv/game/addons/plugins"))
        );
        assert!(!config.plugins.autoload);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let err = HostConfig::parse("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        assert!(HostConfig::load(temp_dir.path().join("missing.toml")).is_err());
    }
}
