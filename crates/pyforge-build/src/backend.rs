/// Backend identities, platforms and per-backend capabilities
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of compilation backend
///
/// Declaration order is the tie-break priority: bundler > translator > freezer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Traditional bundler (PyInstaller-type)
    Bundler,
    /// Ahead-of-time translator (Nuitka-type)
    Translator,
    /// Freezer (cx_Freeze-type)
    Freezer,
}

impl BackendId {
    /// All backends in tie-break priority order
    pub fn all() -> [BackendId; 3] {
        [Self::Bundler, Self::Translator, Self::Freezer]
    }

    /// Stable name used in configuration, fingerprints and output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bundler => "bundler",
            Self::Translator => "translator",
            Self::Freezer => "freezer",
        }
    }

    /// Name of the concrete tool driven by this backend
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Bundler => "pyinstaller",
            Self::Translator => "nuitka",
            Self::Freezer => "cx_freeze",
        }
    }

    /// Tie-break rank, lower wins
    pub fn priority(&self) -> u8 {
        match self {
            Self::Bundler => 0,
            Self::Translator => 1,
            Self::Freezer => 2,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bundler" | "pyinstaller" => Ok(Self::Bundler),
            "translator" | "nuitka" => Ok(Self::Translator),
            "freezer" | "cx_freeze" | "cxfreeze" | "cx-freeze" => Ok(Self::Freezer),
            other => Err(format!(
                "unknown backend '{}' (expected bundler, translator or freezer)",
                other
            )),
        }
    }
}

/// Typical wall-clock class of a backend build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTimeClass {
    Fast,
    Medium,
    Slow,
}

impl BuildTimeClass {
    /// Relative speed in [0, 1], higher is faster
    pub fn speed_factor(&self) -> f64 {
        match self {
            Self::Fast => 1.0,
            Self::Medium => 0.6,
            Self::Slow => 0.25,
        }
    }
}

impl fmt::Display for BuildTimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Medium => write!(f, "medium"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

/// Operating system a build targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Linux,
    Macos,
    Windows,
    Other,
}

impl TargetOs {
    /// Operating system of the running process
    pub fn host() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::Macos,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }

    /// Executable suffix on this OS
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            _ => "",
        }
    }

    /// Separator PyInstaller-style tools expect between source and
    /// destination of a data mapping
    pub fn data_separator(&self) -> char {
        match self {
            Self::Windows => ';',
            _ => ':',
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Macos => write!(f, "macos"),
            Self::Windows => write!(f, "windows"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Target platform triple (architecture, OS, environment)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub arch: String,
    pub os: TargetOs,
    pub env: String,
}

impl Platform {
    /// Platform of the running process
    pub fn host() -> Self {
        let env = if cfg!(target_env = "musl") {
            "musl"
        } else if cfg!(target_env = "msvc") {
            "msvc"
        } else if cfg!(target_env = "gnu") {
            "gnu"
        } else {
            "unknown"
        };
        Self {
            arch: std::env::consts::ARCH.to_string(),
            os: TargetOs::host(),
            env: env.to_string(),
        }
    }

    pub fn new(arch: impl Into<String>, os: TargetOs, env: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            os,
            env: env.into(),
        }
    }

    /// Triple string, e.g. `x86_64-linux-gnu`
    pub fn triple(&self) -> String {
        format!("{}-{}-{}", self.arch, self.os, self.env)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple())
    }
}

/// What one backend can do on this machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCapability {
    /// Installed version, `None` when the tool is absent
    pub version: Option<String>,
    /// Operating systems the backend can produce executables for
    pub platforms: Vec<TargetOs>,
    pub supports_onefile: bool,
    pub supports_icon: bool,
    /// Typical output/input size ratio range (lower is smaller)
    pub compression_ratio: (f64, f64),
    pub build_time: BuildTimeClass,
}

impl BackendCapability {
    /// Static capability sheet for a backend with the given version
    pub fn for_backend(id: BackendId, version: Option<String>) -> Self {
        let all_platforms = vec![TargetOs::Linux, TargetOs::Macos, TargetOs::Windows];
        match id {
            BackendId::Bundler => Self {
                version,
                platforms: all_platforms,
                supports_onefile: true,
                supports_icon: true,
                compression_ratio: (0.45, 0.65),
                build_time: BuildTimeClass::Medium,
            },
            BackendId::Translator => Self {
                version,
                platforms: all_platforms,
                supports_onefile: true,
                supports_icon: true,
                compression_ratio: (0.30, 0.50),
                build_time: BuildTimeClass::Slow,
            },
            BackendId::Freezer => Self {
                version,
                platforms: all_platforms,
                supports_onefile: false,
                supports_icon: true,
                compression_ratio: (0.60, 0.85),
                build_time: BuildTimeClass::Fast,
            },
        }
    }

    /// Whether the tool was found
    pub fn is_installed(&self) -> bool {
        self.version.is_some()
    }

    /// Whether the backend can target the given OS
    pub fn supports_os(&self, os: TargetOs) -> bool {
        self.platforms.contains(&os)
    }

    /// Midpoint of the typical compression ratio range
    pub fn typical_ratio(&self) -> f64 {
        (self.compression_ratio.0 + self.compression_ratio.1) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_matches_declaration_order() {
        let mut ids = vec![BackendId::Freezer, BackendId::Bundler, BackendId::Translator];
        ids.sort();
        assert_eq!(ids, BackendId::all().to_vec());
        assert!(BackendId::Bundler.priority() < BackendId::Translator.priority());
        assert!(BackendId::Translator.priority() < BackendId::Freezer.priority());
    }

    #[test]
    fn test_backend_from_str_accepts_tool_names() {
        assert_eq!("nuitka".parse::<BackendId>(), Ok(BackendId::Translator));
        assert_eq!("PyInstaller".parse::<BackendId>(), Ok(BackendId::Bundler));
        assert_eq!("cx_freeze".parse::<BackendId>(), Ok(BackendId::Freezer));
        assert!("py2exe".parse::<BackendId>().is_err());
    }

    #[test]
    fn test_freezer_has_no_onefile() {
        let cap = BackendCapability::for_backend(BackendId::Freezer, Some("7.2".into()));
        assert!(!cap.supports_onefile);
        assert!(cap.is_installed());
    }

    #[test]
    fn test_platform_triple() {
        let platform = Platform::new("x86_64", TargetOs::Linux, "gnu");
        assert_eq!(platform.triple(), "x86_64-linux-gnu");
        assert_eq!(TargetOs::Windows.exe_suffix(), ".exe");
        assert_eq!(TargetOs::Linux.data_separator(), ':');
    }

    #[test]
    fn test_backend_serializes_lowercase() {
        let json = serde_json::to_string(&BackendId::Translator).unwrap();
        assert_eq!(json, "\"translator\"");
    }
}
