//! Project Configuration (pyforge.toml)
//!
//! Handles project-level configuration stored in `pyforge.toml` at the project root.

use crate::{
    check_backend, check_backend_id, check_positive, check_priority, ConfigError, ConfigResult,
};
use pyforge_build::DataMapping;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration from pyforge.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Build configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
}

/// Build configuration
///
/// Relative paths are resolved against the directory holding pyforge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Entry points built by `pyforge batch` without arguments
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<PathBuf>,

    /// Output directory (default: "dist")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// "auto" or a backend name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_backends: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// Single-file executable (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onefile: Option<bool>,

    /// No console window (default: false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windowed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hidden_imports: Vec<String>,

    /// Extra data as `SRC=DEST`
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_option_loss: Option<bool>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let Some(build) = &self.build else {
            return Ok(());
        };

        let backend = match &build.backend {
            Some(backend) => check_backend("build.backend", backend)?.explicit(),
            None => None,
        };
        for name in &build.exclude_backends {
            let id = check_backend_id("build.exclude_backends", name)?;
            if backend == Some(id) {
                return Err(ConfigError::invalid(
                    "build.exclude_backends",
                    format!("'{}' is also the selected backend", name),
                ));
            }
        }
        if let Some(priority) = &build.priority {
            check_priority("build.priority", priority)?;
        }
        if let Some(timeout) = build.timeout_secs {
            check_positive("build.timeout_secs", timeout)?;
        }
        if let Some(workers) = build.max_workers {
            check_positive("build.max_workers", workers as u64)?;
        }
        if let Some(name) = &build.output_name {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(ConfigError::invalid(
                    "build.output_name",
                    format!("'{}' is not a file name", name),
                ));
            }
        }
        for mapping in &build.data {
            DataMapping::parse(mapping).map_err(|reason| ConfigError::invalid("build.data", reason))?;
        }
        if let Some(module) = build
            .excludes
            .iter()
            .find(|m| build.hidden_imports.contains(m))
        {
            return Err(ConfigError::invalid(
                "build.excludes",
                format!("'{}' is also a hidden import", module),
            ));
        }

        Ok(())
    }

    pub fn build(&self) -> Option<&BuildConfig> {
        self.build.as_ref()
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.build.is_some() {
            self.build = other.build.clone();
        }
    }
}
