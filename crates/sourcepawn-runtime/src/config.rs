//! Runtime configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by every context of a [`crate::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Enable debug mode for contexts whose image carries debug tables.
    pub debug: bool,

    /// Report stack and heap leaks after successful executions.
    pub report_leaks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            report_leaks: true,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(!config.debug);
        assert!(config.report_leaks);
    }

    #[test]
    fn test_partial_override() {
        let config = RuntimeConfig::from_str("debug = true").unwrap();
        assert!(config.debug);
        assert!(config.report_leaks);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RuntimeConfig::from_str("jit = true").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "report_leaks = false").unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert!(!config.report_leaks);

        let missing = RuntimeConfig::from_file(Path::new("/nonexistent/runtime.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
