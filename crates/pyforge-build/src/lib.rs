//! PyForge build orchestration
//!
//! Turns Python programs into native executables by driving third-party
//! backends (a bundler, an ahead-of-time translator and a freezer):
//! - Environment probing and project profiling
//! - Backend scoring with user priorities and machine-local history
//! - Isolated backend invocation with timeouts and fallback
//! - Parallel batch builds with per-fingerprint deduplication
//! - A persistent build cache

pub mod adapter;
pub mod attempt;
pub mod backend;
pub mod cache;
pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod profile;
pub mod request;
pub mod scorer;

// Re-export main types
pub use adapter::{
    AdapterRegistry, BackendAdapter, BundlerAdapter, FreezerAdapter, InvocationSpec,
    TranslatorAdapter,
};
pub use attempt::{
    AttemptStatus, BuildAttempt, BuildOutcome, Failure, FailureClass, Interpretation,
    OutcomeStatus, Verdict,
};
pub use backend::{BackendCapability, BackendId, BuildTimeClass, Platform, TargetOs};
pub use cache::{BackendHistory, BuildCache, CacheEntry, CacheStats, InputDigest};
pub use cancel::CancellationToken;
pub use coordinator::{default_max_workers, Coordinator};
pub use error::{BuildError, BuildResult};
pub use hooks::{ArtifactFormat, ArtifactHandoff, PostBuildHook, PreTransformHook};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use probe::{BackendInfo, Environment, EnvironmentProbe, ToolPaths};
pub use process::{ProcessRunner, ProcessSpec, RawProcessResult, Termination};
pub use profile::{
    DependencyAnalyzer, ImportScanner, ImportSet, ProjectProfile, Profiler, DEFAULT_EXCLUDES,
};
pub use request::{BackendPreference, BuildOptions, BuildRequest, DataMapping, DEFAULT_TIMEOUT};
pub use scorer::{
    score, BackendScore, CostEstimate, Criterion, Priority, ScoringConstraints, ScoringEvidence,
};
