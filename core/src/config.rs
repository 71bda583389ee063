use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KeelError, Result};

/// Environment variable that overrides the keel home directory.
pub const KEEL_HOME_ENV: &str = "KEEL_HOME";

/// Name of the optional configuration file inside the keel home directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Keel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Root of all caches (default: ~/.keel/cache)
    pub cache_dir: PathBuf,

    /// Cache for layers pulled from base images (default: <cache_dir>/base)
    pub base_image_layers_dir: Option<PathBuf>,

    /// Cache for layers built from application files (default: <cache_dir>/application)
    pub application_layers_dir: Option<PathBuf>,

    /// Gzip level used when compressing uncompressed layers (0-9)
    pub compression_level: u32,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            cache_dir: keel_home().join("cache"),
            base_image_layers_dir: None,
            application_layers_dir: None,
            compression_level: 6,
            log_level: LogLevel::Warn,
        }
    }
}

impl KeelConfig {
    /// Load configuration from a YAML file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeelError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: KeelConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<keel home>/config.yaml` if present, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        let path = keel_home().join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the cache cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(KeelError::ConfigError(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Directory of the base image layers cache.
    pub fn base_image_layers_dir(&self) -> PathBuf {
        self.base_image_layers_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("base"))
    }

    /// Directory of the application layers cache.
    pub fn application_layers_dir(&self) -> PathBuf {
        self.application_layers_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("application"))
    }
}

/// Keel home directory: `$KEEL_HOME`, falling back to `~/.keel`.
pub fn keel_home() -> PathBuf {
    if let Ok(home) = std::env::var(KEEL_HOME_ENV) {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .map(|h| h.join(".keel"))
        .unwrap_or_else(|| PathBuf::from(".keel"))
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}
