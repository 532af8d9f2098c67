//! Environment probe
//!
//! Detects which backends are installed, their versions and what they can do
//! on this host. The result is an [`Environment`] value that callers pass
//! explicitly; it only changes through [`Environment::reprobe`].

use crate::backend::{BackendCapability, BackendId, BuildTimeClass, Platform, TargetOs};
use crate::cancel::CancellationToken;
use crate::process::{ProcessRunner, ProcessSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Budget for one version command
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Executable overrides; `None` resolves through `PATH`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub pyinstaller: Option<PathBuf>,
    /// Interpreter used to run `-m nuitka`
    pub python: Option<PathBuf>,
    pub cxfreeze: Option<PathBuf>,
}

/// Probes the host for backends
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    tools: ToolPaths,
    runner: ProcessRunner,
    timeout: Duration,
}

impl EnvironmentProbe {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            runner: ProcessRunner::new(),
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Set the version command budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe every backend
    pub fn probe(&self) -> Environment {
        let host = Platform::host();
        let mut capabilities = BTreeMap::new();
        let mut executables = BTreeMap::new();

        for id in BackendId::all() {
            let (executable, version) = match self.resolve(id) {
                Some(exe) => {
                    let version = self.version(id, &exe);
                    (Some(exe), version)
                }
                None => (None, None),
            };
            debug!(
                backend = %id,
                executable = ?executable,
                version = ?version,
                "probed backend"
            );
            if let (Some(exe), Some(_)) = (&executable, &version) {
                executables.insert(id, exe.clone());
            }
            capabilities.insert(id, BackendCapability::for_backend(id, version));
        }

        let installed = capabilities.values().filter(|c| c.is_installed()).count();
        info!(host = %host, installed, "environment probed");

        Environment {
            host,
            capabilities,
            executables,
            tools: self.tools.clone(),
        }
    }

    fn resolve(&self, id: BackendId) -> Option<PathBuf> {
        let (configured, candidates): (&Option<PathBuf>, &[&str]) = match id {
            BackendId::Bundler => (&self.tools.pyinstaller, &["pyinstaller"]),
            BackendId::Translator => (&self.tools.python, &["python3", "python"]),
            BackendId::Freezer => (&self.tools.cxfreeze, &["cxfreeze"]),
        };
        if let Some(path) = configured {
            return which::which(path).ok();
        }
        candidates.iter().find_map(|name| which::which(name).ok())
    }

    fn version(&self, id: BackendId, executable: &Path) -> Option<String> {
        let spec = match id {
            BackendId::Translator => ProcessSpec::new(executable).args(["-m", "nuitka", "--version"]),
            _ => ProcessSpec::new(executable).arg("--version"),
        };
        let result = self.runner.run(&spec, self.timeout, &CancellationToken::new());
        if !result.success() {
            debug!(backend = %id, exit_code = ?result.exit_code, "version command failed");
            return None;
        }
        parse_version(&result.stdout).or_else(|| parse_version(&result.stderr))
    }
}

impl Default for EnvironmentProbe {
    fn default() -> Self {
        Self::new(ToolPaths::default())
    }
}

/// First version-looking token in a tool's output
pub fn parse_version(output: &str) -> Option<String> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION
        .get_or_init(|| Regex::new(r"\d+(?:\.\d+)+(?:[.-]?[A-Za-z0-9]+)?").ok())
        .as_ref()?;
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    re.find(line)
        .map(|m| m.as_str().to_string())
        .or_else(|| Some(line.to_string()))
}

/// Installed backends and what they can do, as seen at probe time
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub host: Platform,
    pub capabilities: BTreeMap<BackendId, BackendCapability>,
    executables: BTreeMap<BackendId, PathBuf>,
    tools: ToolPaths,
}

/// One row of `pyforge backends`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend: BackendId,
    pub tool: String,
    pub installed: bool,
    pub version: Option<String>,
    pub executable: Option<PathBuf>,
    pub platforms: Vec<TargetOs>,
    pub supports_onefile: bool,
    pub supports_icon: bool,
    pub build_time: BuildTimeClass,
    pub compression_ratio: (f64, f64),
}

impl Environment {
    /// Probe the host with the given tool overrides
    pub fn detect(tools: ToolPaths) -> Self {
        EnvironmentProbe::new(tools).probe()
    }

    /// Environment with a caller-supplied capability table
    pub fn synthetic(host: Platform, capabilities: BTreeMap<BackendId, BackendCapability>) -> Self {
        Self {
            host,
            capabilities,
            executables: BTreeMap::new(),
            tools: ToolPaths::default(),
        }
    }

    /// Synthetic environment where exactly `installed` backends are present
    pub fn with_installed(host: Platform, installed: &[BackendId]) -> Self {
        let capabilities = BackendId::all()
            .into_iter()
            .map(|id| {
                let version = installed.contains(&id).then(|| "0.0.0-test".to_string());
                (id, BackendCapability::for_backend(id, version))
            })
            .collect();
        Self::synthetic(host, capabilities)
    }

    /// Set the executable used for a backend
    pub fn with_executable(mut self, id: BackendId, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(id, path.into());
        self
    }

    /// Probe again with the same tool overrides
    pub fn reprobe(&self) -> Self {
        Self::detect(self.tools.clone())
    }

    pub fn capability(&self, id: BackendId) -> Option<&BackendCapability> {
        self.capabilities.get(&id)
    }

    pub fn is_installed(&self, id: BackendId) -> bool {
        self.capability(id).is_some_and(|c| c.is_installed())
    }

    /// Installed version, if any
    pub fn version(&self, id: BackendId) -> Option<&str> {
        self.capability(id).and_then(|c| c.version.as_deref())
    }

    /// Resolved executable, if probed
    pub fn executable(&self, id: BackendId) -> Option<&Path> {
        self.executables.get(&id).map(PathBuf::as_path)
    }

    pub fn installed(&self) -> Vec<BackendId> {
        BackendId::all()
            .into_iter()
            .filter(|id| self.is_installed(*id))
            .collect()
    }

    /// Rows describing every backend
    pub fn describe(&self) -> Vec<BackendInfo> {
        BackendId::all()
            .into_iter()
            .filter_map(|id| {
                let cap = self.capability(id)?;
                Some(BackendInfo {
                    backend: id,
                    tool: id.tool_name().to_string(),
                    installed: cap.is_installed(),
                    version: cap.version.clone(),
                    executable: self.executables.get(&id).cloned(),
                    platforms: cap.platforms.clone(),
                    supports_onefile: cap.supports_onefile,
                    supports_icon: cap.supports_icon,
                    build_time: cap.build_time,
                    compression_ratio: cap.compression_ratio,
                })
            })
            .collect()
    }
}
