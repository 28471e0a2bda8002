//! Configuration module
//!
//! Handles loading and saving xwire configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::ByteOrder;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Byte order of the wire protocol
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Queued events beyond which the connection is closed
    #[serde(default = "default_event_queue_limit")]
    pub event_queue_limit: usize,
    /// Cap on request length in 4-byte units (server value if not set)
    pub max_request_length: Option<u32>,
    /// Extensions to query when connecting
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_event_queue_limit() -> usize {
    64 * 1024
}

fn default_extensions() -> Vec<String> {
    crate::xproto::extensions()
        .iter()
        .filter_map(|descriptor| descriptor.namespace.extension_name())
        .map(str::to_string)
        .collect()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            event_queue_limit: default_event_queue_limit(),
            max_request_length: None,
            extensions: default_extensions(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_event_queue_limit(mut self, limit: usize) -> Self {
        self.event_queue_limit = limit;
        self
    }

    pub fn with_max_request_length(mut self, words: u32) -> Self {
        self.max_request_length = Some(words);
        self
    }

    pub fn without_extensions(mut self) -> Self {
        self.extensions.clear();
        self
    }

    /// Whether the named extension should be queried
    pub fn wants_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|enabled| enabled == name)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("xwire/config.toml")),
            Some(PathBuf::from("./xwire.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        connection: ConnectionConfig {
            max_request_length: Some(0xffff),
            ..Default::default()
        },
        logging: LoggingConfig {
            verbose: false,
            log_file: Some(PathBuf::from("xwire.log")),
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.byte_order, ByteOrder::Little);
        assert_eq!(config.connection.event_queue_limit, 64 * 1024);
        assert!(config.connection.wants_extension("RANDR"));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.connection.byte_order = ByteOrder::Big;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.connection, config.connection);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nbyte_order = \"big\"\nextensions = []").unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.connection.byte_order, ByteOrder::Big);
        assert_eq!(loaded.connection.event_queue_limit, 64 * 1024);
        assert!(loaded.connection.extensions.is_empty());
        assert!(!loaded.logging.verbose);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.connection.max_request_length, Some(0xffff));
        assert_eq!(parsed.logging.log_file, Some(PathBuf::from("xwire.log")));
    }
}
