/// Build requests and the unified option set
use crate::backend::BackendId;
use crate::error::{BuildError, BuildResult};
use crate::scorer::{Priority, ScoringConstraints};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-attempt wall-clock budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Which backend(s) the caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "backend")]
pub enum BackendPreference {
    /// Let the scorer rank every installed backend
    #[default]
    Auto,
    /// Use exactly this backend
    Explicit(BackendId),
}

impl BackendPreference {
    /// Parse `auto` or a backend name
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.eq_ignore_ascii_case("auto") || s.is_empty() {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Explicit)
        }
    }

    pub fn explicit(&self) -> Option<BackendId> {
        match self {
            Self::Auto => None,
            Self::Explicit(id) => Some(*id),
        }
    }
}

/// One extra data file or directory shipped with the executable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataMapping {
    /// Path on disk
    pub source: PathBuf,
    /// Destination relative to the bundle root
    pub dest: String,
}

impl DataMapping {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }

    /// Parse `SRC=DEST` (DEST defaults to `.`)
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('=') {
            Some((src, dest)) if !src.is_empty() => Ok(Self::new(src, dest)),
            Some(_) => Err(format!("invalid data mapping '{}': empty source", s)),
            None if !s.is_empty() => Ok(Self::new(s, ".")),
            None => Err("invalid data mapping: empty".to_string()),
        }
    }
}

/// Unified option set every adapter translates to its own flags
///
/// Sets are ordered so that serialization, and hence fingerprints, are
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Produce a single executable file instead of a directory
    pub onefile: bool,
    /// GUI application without a console window
    pub windowed: bool,
    /// Icon file
    pub icon: Option<PathBuf>,
    /// Executable name (defaults to the entry point's stem)
    pub output_name: Option<String>,
    /// Modules to leave out
    pub excludes: BTreeSet<String>,
    /// Modules to force in
    pub hidden_imports: BTreeSet<String>,
    /// Extra data files
    pub extra_data: BTreeSet<DataMapping>,
    /// Let adapters drop options they cannot express instead of rejecting
    pub accept_option_loss: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            onefile: true,
            windowed: false,
            icon: None,
            output_name: None,
            excludes: BTreeSet::new(),
            hidden_imports: BTreeSet::new(),
            extra_data: BTreeSet::new(),
            accept_option_loss: false,
        }
    }
}

/// One build target. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Entry-point script
    pub entry_point: PathBuf,
    /// Directory the artifact is written under
    pub output_dir: PathBuf,
    pub backend: BackendPreference,
    /// Backends that must not be used
    pub excluded_backends: BTreeSet<BackendId>,
    /// What the user optimises for
    pub priority: Priority,
    pub options: BuildOptions,
    /// Per-attempt wall-clock budget
    pub timeout: Duration,
    /// Skip the cache lookup (results are still stored)
    pub skip_cache_lookup: bool,
}

impl BuildRequest {
    /// Create a request with default options
    pub fn new(entry_point: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            entry_point: entry_point.into(),
            output_dir: output_dir.into(),
            backend: BackendPreference::Auto,
            excluded_backends: BTreeSet::new(),
            priority: Priority::Balanced,
            options: BuildOptions::default(),
            timeout: DEFAULT_TIMEOUT,
            skip_cache_lookup: false,
        }
    }

    /// Set backend preference
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Exclude a backend
    pub fn excluding(mut self, backend: BackendId) -> Self {
        self.excluded_backends.insert(backend);
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set options
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Set per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set output directory
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Replace the entry point (used after a pre-transform hook)
    pub fn with_entry_point(mut self, entry_point: impl Into<PathBuf>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Skip the cache lookup
    pub fn with_skip_cache_lookup(mut self, skip: bool) -> Self {
        self.skip_cache_lookup = skip;
        self
    }

    /// Executable name for this request
    pub fn output_name(&self) -> String {
        self.options
            .output_name
            .clone()
            .unwrap_or_else(|| file_stem(&self.entry_point))
    }

    /// Scoring constraints derived from this request
    pub fn constraints(&self) -> ScoringConstraints {
        ScoringConstraints {
            explicit_backend: self.backend.explicit(),
            excluded_backends: self.excluded_backends.clone(),
            priority: self.priority,
            require_onefile: self.options.onefile && !self.options.accept_option_loss,
            require_icon: self.options.icon.is_some() && !self.options.accept_option_loss,
        }
    }

    /// Reject option combinations no backend could honour
    pub fn validate(&self) -> BuildResult<()> {
        if self.entry_point.as_os_str().is_empty() {
            return Err(BuildError::InvalidOption(
                "entry point cannot be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(BuildError::InvalidOption(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(id) = self.backend.explicit() {
            if self.excluded_backends.contains(&id) {
                return Err(BuildError::InvalidOption(format!(
                    "backend '{}' is both requested and excluded",
                    id
                )));
            }
        }
        if let Some(name) = &self.options.output_name {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(BuildError::InvalidOption(format!(
                    "invalid output name '{}'",
                    name
                )));
            }
        }
        if let Some(overlap) = self
            .options
            .excludes
            .intersection(&self.options.hidden_imports)
            .next()
        {
            return Err(BuildError::InvalidOption(format!(
                "module '{}' is both excluded and a hidden import",
                overlap
            )));
        }
        Ok(())
    }
}

/// File stem of a path as an owned string
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_onefile_console() {
        let request = BuildRequest::new("app/main.py", "dist");
        assert!(request.options.onefile);
        assert!(!request.options.windowed);
        assert_eq!(request.timeout, DEFAULT_TIMEOUT);
        assert_eq!(request.output_name(), "main");
    }

    #[test]
    fn test_preference_parse() {
        assert_eq!(BackendPreference::parse("auto"), Ok(BackendPreference::Auto));
        assert_eq!(
            BackendPreference::parse("nuitka"),
            Ok(BackendPreference::Explicit(BackendId::Translator))
        );
        assert!(BackendPreference::parse("bogus").is_err());
    }

    #[test]
    fn test_data_mapping_parse() {
        assert_eq!(
            DataMapping::parse("assets=res"),
            Ok(DataMapping::new("assets", "res"))
        );
        assert_eq!(DataMapping::parse("config.json"), Ok(DataMapping::new("config.json", ".")));
        assert!(DataMapping::parse("=res").is_err());
    }

    #[test]
    fn test_validate_rejects_requested_and_excluded() {
        let request = BuildRequest::new("main.py", "dist")
            .with_backend(BackendPreference::Explicit(BackendId::Bundler))
            .excluding(BackendId::Bundler);
        assert!(matches!(
            request.validate(),
            Err(BuildError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_validate_rejects_exclude_hidden_overlap() {
        let mut options = BuildOptions::default();
        options.excludes.insert("json".to_string());
        options.hidden_imports.insert("json".to_string());
        let request = BuildRequest::new("main.py", "dist").with_options(options);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_constraints_relax_with_option_loss() {
        let mut options = BuildOptions::default();
        options.icon = Some(PathBuf::from("app.ico"));
        let strict = BuildRequest::new("main.py", "dist").with_options(options.clone());
        assert!(strict.constraints().require_onefile);
        assert!(strict.constraints().require_icon);

        options.accept_option_loss = true;
        let lossy = BuildRequest::new("main.py", "dist").with_options(options);
        assert!(!lossy.constraints().require_onefile);
        assert!(!lossy.constraints().require_icon);
    }
}
