//! Global Configuration (~/.pyforge/config.toml)
//!
//! Handles user-level configuration stored in `~/.pyforge/config.toml`.

use crate::{
    check_backend, check_log_level, check_positive, check_priority, ConfigError, ConfigResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.pyforge/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default build settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Backend executable overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    /// Build cache settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    /// Log output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Default build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// "auto" or a backend name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// balanced, speed, size or compatibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Per-attempt timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Executable overrides, resolved through PATH when unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pyinstaller: Option<PathBuf>,

    /// Interpreter that runs `-m nuitka`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cxfreeze: Option<PathBuf>,
}

/// Build cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache directory (default: ~/.pyforge/cache)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Set to false to keep the cache in memory only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if let Some(backend) = &defaults.backend {
                check_backend("defaults.backend", backend)?;
            }
            if let Some(priority) = &defaults.priority {
                check_priority("defaults.priority", priority)?;
            }
            if let Some(workers) = defaults.max_workers {
                check_positive("defaults.max_workers", workers as u64)?;
            }
            if let Some(timeout) = defaults.timeout_secs {
                check_positive("defaults.timeout_secs", timeout)?;
            }
        }

        if let Some(level) = self.logging.as_ref().and_then(|l| l.level.as_deref()) {
            check_log_level("logging.level", level)?;
        }

        Ok(())
    }

    /// Get the global config file path (~/.pyforge/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".pyforge").join("config.toml"))
    }

    pub fn defaults(&self) -> Option<&DefaultsConfig> {
        self.defaults.as_ref()
    }

    /// Whether the persistent cache is enabled (default: true)
    pub fn cache_enabled(&self) -> bool {
        self.cache.as_ref().and_then(|c| c.enabled).unwrap_or(true)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.defaults.is_some() {
            self.defaults = other.defaults.clone();
        }
        if other.tools.is_some() {
            self.tools = other.tools.clone();
        }
        if other.cache.is_some() {
            self.cache = other.cache.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}
