//! Project profiling
//!
//! Turns an entry-point script into the feature vector the scorer consumes.
//! Import data comes from a [`DependencyAnalyzer`]; its absence or failure is
//! never fatal and degrades to a minimal profile.

use crate::backend::Platform;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Import frameworks that imply a GUI application
const GUI_FRAMEWORKS: &[&str] = &[
    "tkinter",
    "customtkinter",
    "PyQt5",
    "PyQt6",
    "PySide2",
    "PySide6",
    "wx",
    "kivy",
    "pygame",
    "flet",
    "dearpygui",
    "toga",
];

/// Third-party packages known to ship compiled extension modules
const NATIVE_PACKAGES: &[&str] = &[
    "numpy",
    "scipy",
    "pandas",
    "torch",
    "tensorflow",
    "cv2",
    "lxml",
    "cryptography",
    "PIL",
    "psutil",
    "matplotlib",
    "sklearn",
    "pydantic_core",
    "orjson",
];

/// Modules most programs never need; suggested as excludes when unused
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "tkinter",
    "unittest",
    "doctest",
    "pdb",
    "pydoc",
    "test",
    "tests",
    "turtle",
    "turtledemo",
    "distutils",
    "lib2to3",
    "ensurepip",
    "xmlrpc",
    "wsgiref",
    "ftplib",
    "imaplib",
    "poplib",
    "smtplib",
    "telnetlib",
    "socketserver",
    "sqlite3",
    "dbm",
    "shelve",
];

/// Directories never considered part of the project
const IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    "build",
    "dist",
    "venv",
    ".venv",
    "env",
    "node_modules",
    "site-packages",
];

/// Maximum directory depth walked below the entry point
const MAX_SCAN_DEPTH: usize = 4;

/// Size and import count under which a console script counts as "small"
const SMALL_SOURCE_BYTES: u64 = 64 * 1024;
const SMALL_IMPORT_CLOSURE: usize = 20;

/// Result of dependency analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSet {
    /// Top-level module names imported by the program
    pub imports: BTreeSet<String>,
    /// Modules loaded dynamically
    pub hidden_imports: BTreeSet<String>,
    /// Modules that can safely be left out
    pub suggested_excludes: BTreeSet<String>,
}

/// Dependency-analysis collaborator
pub trait DependencyAnalyzer: Send + Sync {
    fn analyze(&self, entry_point: &Path) -> Result<ImportSet, String>;
}

/// Feature summary of a target script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub entry_point: PathBuf,
    /// Estimated number of modules pulled in
    pub import_closure: usize,
    pub has_gui_framework: bool,
    pub has_native_extensions: bool,
    pub has_data_files: bool,
    /// Total size of Python sources in bytes
    pub source_bytes: u64,
    pub target: Platform,
    /// Whether the profile was built without analyzer input
    pub degraded: bool,
}

impl ProjectProfile {
    /// Minimal profile used when analysis is unavailable
    pub fn minimal(entry_point: impl Into<PathBuf>, target: Platform) -> Self {
        let entry_point = entry_point.into();
        let source_bytes = fs::metadata(&entry_point).map(|m| m.len()).unwrap_or(0);
        Self {
            entry_point,
            import_closure: 0,
            has_gui_framework: false,
            has_native_extensions: false,
            has_data_files: false,
            source_bytes,
            target,
            degraded: true,
        }
    }

    /// A console program with a small footprint
    pub fn is_small_cli(&self) -> bool {
        !self.has_gui_framework
            && self.import_closure <= SMALL_IMPORT_CLOSURE
            && self.source_bytes <= SMALL_SOURCE_BYTES
    }
}

/// Builds [`ProjectProfile`]s
pub struct Profiler {
    analyzer: Option<Arc<dyn DependencyAnalyzer>>,
    target: Platform,
}

impl Profiler {
    /// Create a profiler for the given target platform
    pub fn new(target: Platform) -> Self {
        Self {
            analyzer: None,
            target,
        }
    }

    /// Set the dependency analyzer
    pub fn with_analyzer(mut self, analyzer: Arc<dyn DependencyAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Profile the project rooted at the entry point's directory
    pub fn profile(&self, entry_point: &Path, extra_data: bool) -> ProjectProfile {
        let imports = match &self.analyzer {
            Some(analyzer) => match analyzer.analyze(entry_point) {
                Ok(imports) => Some(imports),
                Err(e) => {
                    warn!(entry = %entry_point.display(), error = %e, "dependency analysis failed, using minimal profile");
                    None
                }
            },
            None => {
                warn!(entry = %entry_point.display(), "no dependency analyzer configured, using minimal profile");
                None
            }
        };

        let Some(imports) = imports else {
            let mut profile = ProjectProfile::minimal(entry_point, self.target.clone());
            profile.has_data_files = extra_data;
            return profile;
        };

        let scan = scan_project(entry_point);
        let all: BTreeSet<&str> = imports
            .imports
            .iter()
            .chain(imports.hidden_imports.iter())
            .map(|m| m.as_str())
            .collect();

        let profile = ProjectProfile {
            entry_point: entry_point.to_path_buf(),
            import_closure: all.len(),
            has_gui_framework: all.iter().any(|m| GUI_FRAMEWORKS.contains(m)),
            has_native_extensions: scan.native_files
                || all.iter().any(|m| NATIVE_PACKAGES.contains(m)),
            has_data_files: extra_data || scan.data_files,
            source_bytes: scan.source_bytes,
            target: self.target.clone(),
            degraded: false,
        };
        debug!(entry = %entry_point.display(), ?profile, "profiled project");
        profile
    }
}

#[derive(Debug, Default)]
struct ProjectScan {
    source_bytes: u64,
    native_files: bool,
    data_files: bool,
}

fn project_files(entry_point: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    let root = entry_point
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    WalkDir::new(root)
        .max_depth(MAX_SCAN_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !(name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref()))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

fn scan_project(entry_point: &Path) -> ProjectScan {
    let mut scan = ProjectScan::default();
    for entry in project_files(entry_point) {
        let ext = entry
            .path()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "py" | "pyw" => {
                scan.source_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
            "so" | "pyd" | "dylib" | "dll" => scan.native_files = true,
            "pyc" | "pyo" | "spec" | "toml" | "cfg" | "lock" | "md" | "rst" | "txt" => {}
            _ => scan.data_files = true,
        }
    }
    scan
}

/// Static import scanner used when no external analyzer is supplied
///
/// Follows imports of sibling modules found next to the entry point.
#[derive(Debug, Default, Clone)]
pub struct ImportScanner;

impl ImportScanner {
    pub fn new() -> Self {
        Self
    }

    /// Extract imports and dynamic-import literals from one source text
    pub fn scan_source(source: &str) -> (BTreeSet<String>, BTreeSet<String>) {
        static IMPORT: OnceLock<Regex> = OnceLock::new();
        static FROM: OnceLock<Regex> = OnceLock::new();
        static DYNAMIC: OnceLock<Regex> = OnceLock::new();
        let import_re = IMPORT.get_or_init(|| {
            Regex::new(r"(?m)^\s*import\s+([A-Za-z_][\w\.]*(?:\s+as\s+\w+)?(?:\s*,\s*[A-Za-z_][\w\.]*(?:\s+as\s+\w+)?)*)")
                .expect("static regex")
        });
        let from_re = FROM.get_or_init(|| {
            Regex::new(r"(?m)^\s*from\s+([A-Za-z_][\w\.]*)\s+import\b").expect("static regex")
        });
        let dynamic_re = DYNAMIC.get_or_init(|| {
            Regex::new(r#"(?:__import__|import_module)\(\s*['"]([A-Za-z_][\w\.]*)['"]"#)
                .expect("static regex")
        });

        let mut imports = BTreeSet::new();
        for cap in import_re.captures_iter(source) {
            for item in cap[1].split(',') {
                let name = item.split_whitespace().next().unwrap_or("");
                if let Some(top) = top_level(name) {
                    imports.insert(top);
                }
            }
        }
        for cap in from_re.captures_iter(source) {
            if let Some(top) = top_level(&cap[1]) {
                imports.insert(top);
            }
        }
        let hidden = dynamic_re
            .captures_iter(source)
            .filter_map(|cap| top_level(&cap[1]))
            .collect();
        (imports, hidden)
    }
}

fn top_level(module: &str) -> Option<String> {
    module
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Everything reachable from an entry point through sibling imports
#[derive(Debug, Default)]
struct ImportWalk {
    imports: BTreeSet<String>,
    hidden: BTreeSet<String>,
    /// Module files and package directories next to the entry point
    local: BTreeSet<PathBuf>,
}

impl ImportScanner {
    /// Local modules and packages the entry point pulls in, sorted
    ///
    /// Unreadable sources end the walk early; the entry point itself is not
    /// included.
    pub fn local_sources(entry_point: &Path) -> BTreeSet<PathBuf> {
        Self::walk(entry_point).map(|w| w.local).unwrap_or_default()
    }

    fn walk(entry_point: &Path) -> Result<ImportWalk, String> {
        let root = entry_point
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut walk = ImportWalk::default();
        let mut queue = VecDeque::from([entry_point.to_path_buf()]);
        let mut visited = BTreeSet::new();

        while let Some(path) = queue.pop_front() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let source = fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            let (found, dynamic) = Self::scan_source(&source);
            walk.hidden.extend(dynamic);
            for module in found {
                let module_file = root.join(format!("{}.py", module));
                let package_dir = root.join(&module);
                let package_init = package_dir.join("__init__.py");
                if module_file.is_file() {
                    walk.local.insert(module_file.clone());
                    queue.push_back(module_file);
                } else if package_init.is_file() {
                    walk.local.insert(package_dir);
                    queue.push_back(package_init);
                } else {
                    walk.imports.insert(module);
                }
            }
        }
        Ok(walk)
    }
}

impl DependencyAnalyzer for ImportScanner {
    fn analyze(&self, entry_point: &Path) -> Result<ImportSet, String> {
        let walk = Self::walk(entry_point)?;

        let suggested_excludes = DEFAULT_EXCLUDES
            .iter()
            .filter(|m| !walk.imports.contains(**m) && !walk.hidden.contains(**m))
            .map(|m| m.to_string())
            .collect();

        debug!(
            entry = %entry_point.display(),
            imports = walk.imports.len(),
            local_modules = walk.local.len(),
            "scanned imports"
        );

        Ok(ImportSet {
            imports: walk.imports,
            hidden_imports: walk.hidden,
            suggested_excludes,
        })
    }
}
