//! Backend adapters
//!
//! One adapter per backend translates a [`BuildRequest`] into a concrete
//! command line, runs it isolated, and classifies the result. Classification
//! is shared: the process termination decides timeouts and cancellation,
//! a zero exit must leave the expected artifact behind, and non-zero exits
//! are permanent only when the output shows an input-side defect.

pub mod bundler;
pub mod freezer;
pub mod translator;

pub use bundler::BundlerAdapter;
pub use freezer::FreezerAdapter;
pub use translator::TranslatorAdapter;

use crate::attempt::{Interpretation, Verdict};
use crate::backend::{BackendId, TargetOs};
use crate::cancel::CancellationToken;
use crate::error::BuildResult;
use crate::probe::Environment;
use crate::process::{ProcessRunner, ProcessSpec, RawProcessResult, Termination};
use crate::profile::ProjectProfile;
use crate::request::BuildRequest;
use crate::scorer::CostEstimate;
use regex::RegexSet;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Input-side defects: every backend would fail the same way
const PERMANENT_MARKERS: &[&str] = &[
    r"\bSyntaxError\b",
    r"\bIndentationError\b",
    r"\bTabError\b",
    r"can't open file",
    r"(?i)script file .* does not exist",
    r"(?i)entry (point|script) .* not found",
];

/// Backend-side problems worth naming in diagnostics
const TRANSIENT_MARKERS: &[(&str, &str)] = &[
    (r"\bModuleNotFoundError\b", "missing module in the build environment"),
    (r"\bImportError\b", "import failure inside the backend"),
    (r"(?i)(no|cannot find a?) ?c compiler|gcc: not found|cl\.exe", "missing C compiler"),
    (r"\bMemoryError\b", "backend ran out of memory"),
];

/// What an adapter will run and where the artifact should appear
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub process: ProcessSpec,
    pub expected_artifact: PathBuf,
    /// Options dropped because the request accepted option loss
    pub warnings: Vec<String>,
}

/// Polymorphic backend contract
pub trait BackendAdapter: Send + Sync {
    fn id(&self) -> BackendId;

    /// Map the unified option set to a command line
    ///
    /// Fails with `UnsupportedOption` for anything the backend cannot express
    /// unless the request accepts option loss.
    fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec>;

    /// Run the command isolated with a wall-clock budget
    fn invoke(
        &self,
        spec: &InvocationSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RawProcessResult {
        ProcessRunner::new().run(&spec.process, timeout, cancel)
    }

    /// Classify a finished run
    fn interpret(&self, spec: &InvocationSpec, raw: &RawProcessResult) -> Interpretation {
        classify(spec, raw, self.permanent_markers())
    }

    /// Rough time and size for scoring
    fn estimate_cost(&self, profile: &ProjectProfile) -> CostEstimate;

    /// Extra backend-specific input-side markers (plain substrings)
    fn permanent_markers(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Shared classification of a process result
pub fn classify(
    spec: &InvocationSpec,
    raw: &RawProcessResult,
    extra_permanent: &[&str],
) -> Interpretation {
    let mut diagnostics = format!("$ {}\n", spec.process.display());
    for warning in &spec.warnings {
        diagnostics.push_str(&format!("warning: {}\n", warning));
    }

    let verdict = match &raw.termination {
        Termination::Cancelled => {
            diagnostics.push_str("cancelled\n");
            Verdict::Cancelled
        }
        Termination::TimedOut => {
            diagnostics.push_str(&format!(
                "timed out after {:.1}s, process tree killed\n",
                raw.elapsed.as_secs_f64()
            ));
            Verdict::TimedOut
        }
        Termination::SpawnFailed(reason) => {
            diagnostics.push_str(&format!("backend not invocable: {}\n", reason));
            Verdict::FailedTransient
        }
        Termination::Exited => match raw.exit_code {
            Some(0) if spec.expected_artifact.exists() => {
                diagnostics.push_str(&raw.output());
                return Interpretation::succeeded(spec.expected_artifact.clone(), diagnostics);
            }
            Some(0) => {
                diagnostics.push_str(&format!(
                    "exited successfully but artifact {} is missing\n",
                    spec.expected_artifact.display()
                ));
                Verdict::FailedTransient
            }
            Some(code) => {
                let output = format!("{}\n{}", raw.stdout, raw.stderr);
                if is_permanent(&output, extra_permanent) {
                    diagnostics.push_str(&format!("exit code {}: input is invalid\n", code));
                    Verdict::FailedPermanent
                } else {
                    let reason = transient_reason(&output).unwrap_or("backend failed");
                    diagnostics.push_str(&format!("exit code {}: {}\n", code, reason));
                    Verdict::FailedTransient
                }
            }
            None => {
                diagnostics.push_str("killed by signal\n");
                Verdict::FailedTransient
            }
        },
    };
    diagnostics.push_str(&raw.output());
    Interpretation::new(verdict, diagnostics)
}

fn is_permanent(output: &str, extra: &[&str]) -> bool {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    let shared = SET
        .get_or_init(|| RegexSet::new(PERMANENT_MARKERS).ok())
        .as_ref()
        .is_some_and(|set| set.is_match(output));
    shared || extra.iter().any(|marker| output.contains(marker))
}

fn transient_reason(output: &str) -> Option<&'static str> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    let set = SET
        .get_or_init(|| RegexSet::new(TRANSIENT_MARKERS.iter().map(|(re, _)| *re)).ok())
        .as_ref()?;
    set.matches(output)
        .iter()
        .next()
        .map(|i| TRANSIENT_MARKERS[i].1)
}

/// Executable file name on the target OS
pub(crate) fn exe_name(name: &str, os: TargetOs) -> String {
    format!("{}{}", name, os.exe_suffix())
}

/// Path rendered for a command line argument
pub(crate) fn arg_path(path: &Path) -> String {
    path.display().to_string()
}

/// Linear cost model shared by the adapters
pub(crate) fn linear_cost(
    profile: &ProjectProfile,
    base_secs: f64,
    secs_per_import: f64,
    base_bytes: u64,
    bytes_per_import: u64,
) -> CostEstimate {
    const GUI_RUNTIME_BYTES: u64 = 15 * 1024 * 1024;
    const NATIVE_RUNTIME_BYTES: u64 = 5 * 1024 * 1024;

    let imports = profile.import_closure as u64;
    let mut bytes = base_bytes + bytes_per_import * imports + profile.source_bytes;
    if profile.has_gui_framework {
        bytes += GUI_RUNTIME_BYTES;
    }
    if profile.has_native_extensions {
        bytes += NATIVE_RUNTIME_BYTES;
    }
    CostEstimate {
        seconds: base_secs
            + secs_per_import * imports as f64
            + profile.source_bytes as f64 / 200_000.0,
        bytes,
    }
}

/// Adapters by backend
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<BackendId, Arc<dyn BackendAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three real adapters, using probed executables
    pub fn from_environment(env: &Environment) -> Self {
        let os = env.host.os;
        let exe = |id: BackendId, fallback: &str| {
            env.executable(id)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(fallback))
        };
        Self::new()
            .with_adapter(Arc::new(BundlerAdapter::new(
                exe(BackendId::Bundler, "pyinstaller"),
                os,
            )))
            .with_adapter(Arc::new(TranslatorAdapter::new(
                exe(BackendId::Translator, "python3"),
                os,
            )))
            .with_adapter(Arc::new(FreezerAdapter::new(
                exe(BackendId::Freezer, "cxfreeze"),
                os,
            )))
    }

    /// Register or replace the adapter for its backend
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.id(), adapter);
        self
    }

    pub fn get(&self, id: BackendId) -> Option<&Arc<dyn BackendAdapter>> {
        self.adapters.get(&id)
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(artifact: PathBuf) -> InvocationSpec {
        InvocationSpec {
            process: ProcessSpec::new("tool").arg("main.py"),
            expected_artifact: artifact,
            warnings: vec!["dropped option 'onefile'".to_string()],
        }
    }

    fn raw(termination: Termination, exit_code: Option<i32>, stderr: &str) -> RawProcessResult {
        RawProcessResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            elapsed: Duration::from_millis(10),
            termination,
        }
    }

    #[test]
    fn test_success_requires_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("app");
        let result = raw(Termination::Exited, Some(0), "");

        let missing = classify(&spec(artifact.clone()), &result, &[]);
        assert_eq!(missing.verdict, Verdict::FailedTransient);
        assert!(missing.diagnostics.contains("is missing"));

        std::fs::write(&artifact, b"exe").unwrap();
        let found = classify(&spec(artifact.clone()), &result, &[]);
        assert_eq!(found.verdict, Verdict::Succeeded);
        assert_eq!(found.artifact, Some(artifact));
        assert!(found.diagnostics.contains("warning: dropped option 'onefile'"));
    }

    #[test]
    fn test_syntax_error_is_permanent() {
        let result = raw(
            Termination::Exited,
            Some(1),
            "  File \"main.py\", line 3\n    def f(\nSyntaxError: invalid syntax",
        );
        let interpretation = classify(&spec(PathBuf::from("/none")), &result, &[]);
        assert_eq!(interpretation.verdict, Verdict::FailedPermanent);
        assert!(interpretation.diagnostics.contains("SyntaxError"));
    }

    #[test]
    fn test_missing_module_is_transient() {
        let result = raw(
            Termination::Exited,
            Some(1),
            "ModuleNotFoundError: No module named 'numpy'",
        );
        let interpretation = classify(&spec(PathBuf::from("/none")), &result, &[]);
        assert_eq!(interpretation.verdict, Verdict::FailedTransient);
        assert!(interpretation.diagnostics.contains("missing module"));
    }

    #[test]
    fn test_unknown_failure_is_transient() {
        let result = raw(Termination::Exited, Some(2), "something odd");
        let interpretation = classify(&spec(PathBuf::from("/none")), &result, &[]);
        assert_eq!(interpretation.verdict, Verdict::FailedTransient);
    }

    #[test]
    fn test_extra_markers() {
        let result = raw(Termination::Exited, Some(1), "FATAL: bad input");
        let interpretation = classify(&spec(PathBuf::from("/none")), &result, &["FATAL: bad input"]);
        assert_eq!(interpretation.verdict, Verdict::FailedPermanent);
    }

    #[test]
    fn test_termination_verdicts() {
        let s = spec(PathBuf::from("/none"));
        assert_eq!(
            classify(&s, &raw(Termination::TimedOut, None, ""), &[]).verdict,
            Verdict::TimedOut
        );
        assert_eq!(
            classify(&s, &raw(Termination::Cancelled, None, ""), &[]).verdict,
            Verdict::Cancelled
        );
        let spawn = classify(
            &s,
            &raw(Termination::SpawnFailed("not found".into()), None, ""),
            &[],
        );
        assert_eq!(spawn.verdict, Verdict::FailedTransient);
        assert!(spawn.diagnostics.contains("not invocable"));
        assert_eq!(
            classify(&s, &raw(Termination::Exited, None, ""), &[]).verdict,
            Verdict::FailedTransient
        );
    }

    #[test]
    fn test_registry_from_environment() {
        let env = Environment::with_installed(crate::backend::Platform::host(), &[]);
        let registry = AdapterRegistry::from_environment(&env);
        assert_eq!(registry.ids(), BackendId::all().to_vec());
        assert_eq!(
            registry.get(BackendId::Freezer).map(|a| a.id()),
            Some(BackendId::Freezer)
        );
    }
}
