//! Error types for the plugin host.

use sourcepawn_runtime::SpError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while managing plugins.
#[derive(Error, Debug)]
pub enum HostError {
    /// No plugin file or registered plugin by that name.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// A plugin with the same file name is already registered.
    #[error("Plugin \"{0}\" is already loaded")]
    AlreadyLoaded(String),

    /// The image could not be loaded or a context could not be created.
    #[error("Failed to load {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: SpError,
    },

    /// Required natives are still unbound.
    #[error("Plugin \"{plugin}\" requires unbound natives: {}", .natives.join(", "))]
    MissingNatives { plugin: String, natives: Vec<String> },

    /// The plugin is in a state that does not allow running it.
    #[error("Plugin \"{plugin}\" cannot run: {reason}")]
    NotRunnable { plugin: String, reason: String },

    /// A call into the plugin failed.
    #[error("Plugin \"{plugin}\" failed: {source}")]
    Execution {
        plugin: String,
        #[source]
        source: SpError,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_natives_lists_names() {
        let err = HostError::MissingNatives {
            plugin: "admin.smx".to_string(),
            natives: vec!["SQL_Connect".to_string(), "GetUserFlagBits".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Plugin \"admin.smx\" requires unbound natives: SQL_Connect, GetUserFlagBits"
        );
    }

    #[test]
    fn test_execution_error_carries_source() {
        let err = HostError::Execution {
            plugin: "basechat.smx".to_string(),
            source: SpError::DivideByZero,
        };
        assert_eq!(err.to_string(), "Plugin \"basechat.smx\" failed: Divide by zero");
        assert!(std::error::Error::source(&err).is_some());
    }
}
