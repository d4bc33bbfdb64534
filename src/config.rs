//! Bridge configuration.
//!
//! Loaded from `~/.rdpbridge/config.toml`; every key is optional:
//!
//! ```toml
//! [session]
//! max_sessions = 64
//!
//! [dispatch]
//! # Run listener callbacks on a dedicated application thread
//! application_context = true
//! # Longest an engine thread waits for authenticate / verify-certificate
//! request_timeout_ms = 30000
//! # Longest an engine thread waits for any other callback
//! notification_timeout_ms = 5000
//!
//! [engine]
//! data_directory = "/var/lib/rdpbridge"
//!
//! [log]
//! level = "info"
//! file = "/tmp/rdpbridge.log"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::DispatchTimeouts;
use crate::core::registry::DEFAULT_CAPACITY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine config path")]
    NoConfigDir,
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most sessions allocated at once
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub application_context: bool,
    pub request_timeout_ms: u64,
    pub notification_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            application_context: true,
            request_timeout_ms: 30_000,
            notification_timeout_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    pub fn timeouts(&self) -> DispatchTimeouts {
        DispatchTimeouts {
            request: Duration::from_millis(self.request_timeout_ms),
            notification: Duration::from_millis(self.notification_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pushed to every engine instance when it is created
    pub data_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RDPBRIDGE_LOG` is unset
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl BridgeConfig {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring config file");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ConfigError::Write { path, source })
    }

    /// `~/.rdpbridge`
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".rdpbridge"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Log file: configured path, else `~/.rdpbridge/rdpbridge.log`
    pub fn log_path(&self) -> PathBuf {
        self.log
            .file
            .clone()
            .or_else(|| Self::config_dir().map(|dir| dir.join("rdpbridge.log")))
            .unwrap_or_else(|| PathBuf::from("rdpbridge.log"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.session.max_sessions, DEFAULT_CAPACITY);
        assert!(config.dispatch.application_context);
        assert_eq!(config.dispatch.timeouts().request, Duration::from_secs(30));
        assert_eq!(config.dispatch.timeouts().notification, Duration::from_secs(5));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_file() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [dispatch]
            request_timeout_ms = 250

            [engine]
            data_directory = "/tmp/certs"
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch.timeouts().request, Duration::from_millis(250));
        assert_eq!(config.dispatch.notification_timeout_ms, 5_000);
        assert!(config.dispatch.application_context);
        assert_eq!(config.engine.data_directory, Some(PathBuf::from("/tmp/certs")));
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_invalid_file() {
        let err = BridgeConfig::from_toml_str("[session]\nmax_sessions = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = BridgeConfig::default();
        config.log.file = Some(PathBuf::from("/tmp/bridge.log"));
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
        assert_eq!(config.log_path(), PathBuf::from("/tmp/bridge.log"));
    }
}
