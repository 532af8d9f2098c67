//! PyForge Configuration System
//!
//! Provides configuration management for PyForge builds including:
//! - Project configuration (pyforge.toml)
//! - Global user configuration (~/.pyforge/config.toml)
//! - Environment overrides (PYFORGE_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.pyforge/config.toml)
//! 2. Project config (./pyforge.toml, searched upwards)
//! 3. Environment variables (PYFORGE_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use pyforge_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("{} workers", config.max_workers());
//! ```

pub mod global;
pub mod loader;
pub mod project;

use pyforge_build::{BackendId, BackendPreference, Priority};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Shared value checks used by both config files and env overrides

pub(crate) fn check_backend(field: &str, value: &str) -> ConfigResult<BackendPreference> {
    BackendPreference::parse(value).map_err(|reason| ConfigError::invalid(field, reason))
}

pub(crate) fn check_backend_id(field: &str, value: &str) -> ConfigResult<BackendId> {
    value
        .parse()
        .map_err(|reason: String| ConfigError::invalid(field, reason))
}

pub(crate) fn check_priority(field: &str, value: &str) -> ConfigResult<Priority> {
    value
        .parse()
        .map_err(|reason: String| ConfigError::invalid(field, reason))
}

pub(crate) fn check_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

pub(crate) fn check_log_level(field: &str, value: &str) -> ConfigResult<()> {
    if !matches!(
        value.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(ConfigError::invalid(
            field,
            format!(
                "must be one of trace, debug, info, warn, error, off; got '{}'",
                value
            ),
        ));
    }
    Ok(())
}

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader, EnvOverrides};
pub use project::ProjectConfig;
