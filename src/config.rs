//! Session configuration.
//!
//! Holds everything needed to reach the backend and seed a session: service
//! URL, project identity, output bucket, and editing defaults. Stored as JSON
//! with a format version so older files load cleanly.

use serde::{Deserialize, Serialize};

use crate::message::WriteMode;

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_bucket() -> String {
    "label-output".to_string()
}

fn default_brush_size() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Configuration for one editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Version of the configuration file format
    #[serde(default = "default_version")]
    pub version: u32,

    /// Backend service URL, no trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Project to load and edit
    #[serde(default)]
    pub project_id: String,

    /// Bucket the backend repackages uploads into
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// How drawn regions combine with existing labels
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Initial brush radius in pixels
    #[serde(default = "default_brush_size")]
    pub brush_size: u32,

    /// Overall timeout for one backend request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SessionConfig {
    /// Create a configuration with default values for `project_id`.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Default filename for config export.
    pub fn default_filename() -> &'static str {
        "slate-config.json"
    }

    /// Default config file path for auto-load/save.
    pub fn default_path() -> Option<std::path::PathBuf> {
        // Prefer the XDG config directory, fall back to the home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("slate").join(Self::default_filename()))
        } else if let Some(home_dir) = dirs::home_dir() {
            Some(
                home_dir
                    .join(".config")
                    .join("slate")
                    .join(Self::default_filename()),
            )
        } else {
            None
        }
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(config) => {
                    log::info!("Loaded configuration from {:?}", path);
                    Some(config)
                }
                Err(err) => {
                    log::warn!("Failed to parse config file {:?}: {}", path, err);
                    None
                }
            },
            Err(err) => {
                log::warn!("Failed to read config file {:?}: {}", path, err);
                None
            }
        }
    }

    /// Save configuration to the default path.
    pub fn save_to_default_path(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = self.to_json()?;
        std::fs::write(&path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            base_url: default_base_url(),
            project_id: String::new(),
            bucket: default_bucket(),
            write_mode: WriteMode::default(),
            brush_size: default_brush_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::new("project-7");
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.project_id, "project-7");
        assert_eq!(config.write_mode, WriteMode::Overlap);
        assert_eq!(config.brush_size, 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = SessionConfig::new("p");
        config.write_mode = WriteMode::Overwrite;
        config.brush_size = 5;
        let json = config.to_json().unwrap();
        let back = SessionConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = SessionConfig::from_json(r#"{"project_id": "x"}"#).unwrap();
        assert_eq!(config.project_id, "x");
        assert_eq!(config.base_url, default_base_url());
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_newer_version_rejected() {
        let json = format!(r#"{{"version": {}}}"#, CONFIG_VERSION + 1);
        assert!(matches!(
            SessionConfig::from_json(&json),
            Err(ConfigError::VersionTooNew { .. })
        ));
    }
}
