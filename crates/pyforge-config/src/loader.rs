//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{BuildConfig, ProjectConfig};
use crate::{
    check_backend, check_log_level, check_positive, check_priority, ConfigError, ConfigResult,
};
use pyforge_build::{
    BackendId, BackendPreference, BuildOptions, DataMapping, Priority, ToolPaths, DEFAULT_TIMEOUT,
};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project file name searched for from the working directory upwards
pub const PROJECT_FILE: &str = "pyforge.toml";

/// Default output directory, relative to the project root
pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.pyforge/config.toml) - lowest priority
/// 2. Project config (./pyforge.toml) - overrides global
/// 3. Environment variables (PYFORGE_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Values taken from PYFORGE_* environment variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub backend: Option<BackendPreference>,
    pub priority: Option<Priority>,
    pub max_workers: Option<usize>,
    pub timeout: Option<Duration>,
    pub cache_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Environment overrides
    pub env: EnvOverrides,

    /// Project root directory (where pyforge.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Read the global config from `path` instead of the home directory
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find pyforge.toml, then loads the
    /// global config if it exists and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;

        Ok(Config {
            project: project_config,
            global: global_config,
            env: EnvOverrides::from_env()?,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            env: EnvOverrides::from_env()?,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config); the default config when no
    /// pyforge.toml exists up to the filesystem root.
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.pyforge/config.toml
    ///
    /// A missing file or home directory yields the default config; a broken
    /// file is an error.
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Get the global configuration directory (~/.pyforge)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".pyforge"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvOverrides {
    /// Read PYFORGE_BACKEND, PYFORGE_PRIORITY, PYFORGE_MAX_WORKERS,
    /// PYFORGE_TIMEOUT (seconds), PYFORGE_CACHE_DIR and PYFORGE_LOG
    pub fn from_env() -> ConfigResult<Self> {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut overrides = Self::default();

        if let Some(backend) = var("PYFORGE_BACKEND") {
            overrides.backend = Some(check_backend("PYFORGE_BACKEND", backend.trim())?);
        }
        if let Some(priority) = var("PYFORGE_PRIORITY") {
            overrides.priority = Some(check_priority("PYFORGE_PRIORITY", priority.trim())?);
        }
        if let Some(workers) = var("PYFORGE_MAX_WORKERS") {
            let workers = parse_number("PYFORGE_MAX_WORKERS", &workers)?;
            overrides.max_workers = Some(workers as usize);
        }
        if let Some(timeout) = var("PYFORGE_TIMEOUT") {
            let secs = parse_number("PYFORGE_TIMEOUT", &timeout)?;
            overrides.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(dir) = var("PYFORGE_CACHE_DIR") {
            overrides.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = var("PYFORGE_LOG") {
            check_log_level("PYFORGE_LOG", level.trim())?;
            overrides.log_level = Some(level.trim().to_lowercase());
        }

        Ok(overrides)
    }
}

fn parse_number(field: &str, value: &str) -> ConfigResult<u64> {
    let n: u64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{}' is not a number", value)))?;
    check_positive(field, n)?;
    Ok(n)
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has pyforge.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    fn build(&self) -> Option<&BuildConfig> {
        self.project.build()
    }

    /// Resolve a config path against the project root
    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Effective backend preference (env > project > global > auto)
    pub fn backend(&self) -> BackendPreference {
        if let Some(backend) = self.env.backend {
            return backend;
        }
        self.build()
            .and_then(|b| b.backend.as_deref())
            .or_else(|| self.global.defaults().and_then(|d| d.backend.as_deref()))
            .and_then(|s| BackendPreference::parse(s).ok())
            .unwrap_or_default()
    }

    /// Backends the project never wants
    pub fn excluded_backends(&self) -> BTreeSet<BackendId> {
        self.build()
            .map(|b| {
                b.exclude_backends
                    .iter()
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Effective priority (env > project > global > balanced)
    pub fn priority(&self) -> Priority {
        if let Some(priority) = self.env.priority {
            return priority;
        }
        self.build()
            .and_then(|b| b.priority.as_deref())
            .or_else(|| self.global.defaults().and_then(|d| d.priority.as_deref()))
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Effective worker count (default: number of CPUs)
    pub fn max_workers(&self) -> usize {
        self.env
            .max_workers
            .or_else(|| self.build().and_then(|b| b.max_workers))
            .or_else(|| self.global.defaults().and_then(|d| d.max_workers))
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }

    /// Effective per-attempt timeout (default: 600 s)
    pub fn timeout(&self) -> Duration {
        self.env
            .timeout
            .or_else(|| {
                self.build()
                    .and_then(|b| b.timeout_secs)
                    .or_else(|| self.global.defaults().and_then(|d| d.timeout_secs))
                    .map(Duration::from_secs)
            })
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Persistent cache directory, `None` when the cache is disabled
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.env.cache_dir {
            return Some(dir.clone());
        }
        if !self.global.cache_enabled() {
            return None;
        }
        self.global
            .cache
            .as_ref()
            .and_then(|c| c.dir.clone())
            .or_else(|| {
                ConfigLoader::global_config_dir()
                    .ok()
                    .map(|d| d.join("cache"))
            })
    }

    /// Log filter directive (env > global > "info")
    pub fn log_level(&self) -> &str {
        self.env
            .log_level
            .as_deref()
            .or_else(|| self.global.log_level())
            .unwrap_or("info")
    }

    /// Executable overrides for the environment probe
    pub fn tool_paths(&self) -> ToolPaths {
        let tools = self.global.tools.clone().unwrap_or_default();
        ToolPaths {
            pyinstaller: tools.pyinstaller,
            python: tools.python,
            cxfreeze: tools.cxfreeze,
        }
    }

    /// Output directory (default: `dist` under the project root)
    pub fn output_dir(&self) -> PathBuf {
        let dir = self
            .build()
            .and_then(|b| b.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        self.resolve(&dir)
    }

    /// Configured batch targets, resolved against the project root
    pub fn targets(&self) -> Vec<PathBuf> {
        self.build()
            .map(|b| b.targets.iter().map(|t| self.resolve(t)).collect())
            .unwrap_or_default()
    }

    /// Build options from the project file
    pub fn build_options(&self) -> BuildOptions {
        let defaults = BuildOptions::default();
        let Some(build) = self.build() else {
            return defaults;
        };
        BuildOptions {
            onefile: build.onefile.unwrap_or(defaults.onefile),
            windowed: build.windowed.unwrap_or(defaults.windowed),
            icon: build.icon.as_deref().map(|p| self.resolve(p)),
            output_name: build.output_name.clone(),
            excludes: build.excludes.iter().cloned().collect(),
            hidden_imports: build.hidden_imports.iter().cloned().collect(),
            extra_data: build
                .data
                .iter()
                .filter_map(|s| DataMapping::parse(s).ok())
                .map(|m| DataMapping::new(self.resolve(&m.source), m.dest))
                .collect(),
            accept_option_loss: build.accept_option_loss.unwrap_or(false),
        }
    }
}
