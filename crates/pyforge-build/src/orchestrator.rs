//! Build orchestration for one request
//!
//! The orchestrator runs an explicit state machine:
//!
//! ```text
//! Queued → Scoring → Attempting(i) → Succeeded        → Terminal
//!    │                    │        → Attempting(i+1)
//!    │                    └───────→ PermanentFailure → Terminal
//!    └── cache hit ─────────────────→ Succeeded
//! ```
//!
//! Every ranked candidate that is reached leaves a [`BuildAttempt`], so a
//! failed outcome always explains why each backend was rejected.

use crate::adapter::AdapterRegistry;
use crate::attempt::{
    BuildAttempt, BuildOutcome, Failure, FailureClass, Interpretation, Verdict,
};
use crate::backend::BackendId;
use crate::cache::{BuildCache, CacheEntry, Claim, InputDigest, Waited};
use crate::cancel::CancellationToken;
use crate::error::{BuildError, BuildResult};
use crate::hooks::{ArtifactHandoff, PostBuildHook, PreTransformHook};
use crate::probe::Environment;
use crate::profile::{ImportScanner, Profiler};
use crate::request::BuildRequest;
use crate::scorer::{self, BackendScore, ScoringEvidence};
use chrono::Utc;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where one request is in its lifecycle
#[derive(Debug)]
pub enum OrchestratorState {
    Queued,
    Scoring,
    /// Trying the candidate at this rank
    Attempting(usize),
    /// `cached` is set when the artifact came from the build cache
    Succeeded { cached: Option<CacheEntry> },
    PermanentFailure(Failure),
    Terminal(Box<BuildOutcome>),
}

/// Request after validation, pre-transform and input hashing
struct Prepared {
    request: BuildRequest,
    digest: InputDigest,
    build_key: String,
}

/// Mutable record of one run
#[derive(Default)]
struct Run {
    ranking: Vec<BackendScore>,
    attempts: Vec<BuildAttempt>,
}

/// Drives single builds against a shared environment and cache
pub struct Orchestrator {
    env: Arc<Environment>,
    adapters: AdapterRegistry,
    cache: Arc<BuildCache>,
    profiler: Profiler,
    pre_transform: Option<Arc<dyn PreTransformHook>>,
    post_build: Vec<Arc<dyn PostBuildHook>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Orchestrator with the real adapters, the static import scanner and an
    /// in-memory cache
    pub fn new(env: Arc<Environment>) -> Self {
        let adapters = AdapterRegistry::from_environment(&env);
        let profiler = Profiler::new(env.host.clone()).with_analyzer(Arc::new(ImportScanner::new()));
        Self {
            env,
            adapters,
            cache: Arc::new(BuildCache::in_memory()),
            profiler,
            pre_transform: None,
            post_build: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }

    /// Transform applied to the entry point before profiling
    pub fn with_pre_transform(mut self, hook: Arc<dyn PreTransformHook>) -> Self {
        self.pre_transform = Some(hook);
        self
    }

    /// Hook run after every fresh successful build
    pub fn with_post_build(mut self, hook: Arc<dyn PostBuildHook>) -> Self {
        self.post_build.push(hook);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Build one request to its terminal outcome
    ///
    /// Only one build per build key runs at a time across everything sharing
    /// this cache; later callers wait and share the leader's outcome.
    pub fn build(&self, request: &BuildRequest) -> BuildOutcome {
        let start = Instant::now();
        if self.cancel.is_cancelled() {
            return BuildOutcome::cancelled(&request.entry_point, "cancelled before start");
        }

        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(entry = %request.entry_point.display(), error = %e, "build rejected");
                return BuildOutcome::rejected(&request.entry_point, &e, start.elapsed());
            }
        };

        loop {
            match self.cache.claim(&prepared.build_key) {
                Claim::Leader(guard) => {
                    let outcome = self.drive(request, &prepared, start);
                    guard.publish(&outcome);
                    info!(
                        entry = %request.entry_point.display(),
                        status = %outcome.status,
                        backend = ?outcome.backend,
                        attempts = outcome.attempts.len(),
                        from_cache = outcome.from_cache,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "build finished"
                    );
                    return outcome;
                }
                Claim::Follower(wait) => match wait.wait(&self.cancel) {
                    Waited::Finished(shared) => {
                        debug!(
                            entry = %request.entry_point.display(),
                            status = %shared.status,
                            "served by an identical in-flight build"
                        );
                        return shared.shared_with(&request.entry_point, start.elapsed());
                    }
                    // Leader faulted without an outcome; try to lead
                    Waited::Abandoned => {}
                    Waited::Cancelled => {
                        return BuildOutcome::cancelled(
                            &request.entry_point,
                            "cancelled while waiting for an identical build",
                        );
                    }
                },
            }
        }
    }

    fn prepare(&self, request: &BuildRequest) -> BuildResult<Prepared> {
        request.validate()?;
        if !request.entry_point.is_file() {
            return Err(BuildError::InvalidOption(format!(
                "entry point '{}' does not exist",
                request.entry_point.display()
            )));
        }
        fs::create_dir_all(&request.output_dir)
            .map_err(|e| BuildError::io(&request.output_dir, e))?;

        let mut effective = request.clone();
        if let Some(hook) = &self.pre_transform {
            let work_dir = request.output_dir.join(".work").join("transformed");
            fs::create_dir_all(&work_dir).map_err(|e| BuildError::io(&work_dir, e))?;
            let transformed = hook
                .transform(&request.entry_point, &work_dir)
                .map_err(|e| BuildError::hook(hook.name(), e))?;
            info!(
                hook = hook.name(),
                from = %request.entry_point.display(),
                to = %transformed.display(),
                "entry point transformed"
            );
            effective = effective.with_entry_point(transformed);
        }

        let digest = InputDigest::compute(&effective)?;
        let build_key = digest.build_key(&effective);
        Ok(Prepared {
            request: effective,
            digest,
            build_key,
        })
    }

    fn drive(&self, original: &BuildRequest, prepared: &Prepared, start: Instant) -> BuildOutcome {
        let request = &prepared.request;
        let mut run = Run::default();
        let mut state = OrchestratorState::Queued;

        loop {
            debug!(entry = %original.entry_point.display(), state = ?state, "orchestrator state");
            state = match state {
                OrchestratorState::Queued => {
                    let hit = if request.skip_cache_lookup {
                        None
                    } else {
                        self.lookup(prepared)
                    };
                    match hit {
                        Some(entry) => OrchestratorState::Succeeded { cached: Some(entry) },
                        None => OrchestratorState::Scoring,
                    }
                }

                OrchestratorState::Scoring => {
                    let profile = self
                        .profiler
                        .profile(&request.entry_point, !request.options.extra_data.is_empty());
                    let estimates = self
                        .adapters
                        .ids()
                        .into_iter()
                        .filter_map(|id| {
                            self.adapters
                                .get(id)
                                .map(|adapter| (id, adapter.estimate_cost(&profile)))
                        })
                        .collect();
                    let evidence = ScoringEvidence {
                        success_rates: self.cache.success_rates(),
                        estimates,
                    };
                    match scorer::score(
                        &profile,
                        &self.env.capabilities,
                        &request.constraints(),
                        &evidence,
                    ) {
                        Ok(ranking) => {
                            info!(
                                entry = %original.entry_point.display(),
                                ranking = ?ranking.iter().map(|s| s.backend).collect::<Vec<_>>(),
                                "backends ranked"
                            );
                            run.ranking = ranking;
                            OrchestratorState::Attempting(0)
                        }
                        Err(e) => OrchestratorState::PermanentFailure(Failure::from(&e)),
                    }
                }

                OrchestratorState::Attempting(index) => self.step(request, &mut run, index),

                OrchestratorState::Succeeded { cached } => {
                    let outcome = match cached {
                        Some(entry) => {
                            info!(
                                fingerprint = %entry.fingerprint,
                                artifact = %entry.artifact.display(),
                                "served from cache"
                            );
                            BuildOutcome::cached(
                                &original.entry_point,
                                entry.backend,
                                entry.artifact,
                                entry.fingerprint,
                                start.elapsed(),
                            )
                        }
                        None => {
                            let outcome = BuildOutcome::succeeded(
                                &original.entry_point,
                                std::mem::take(&mut run.attempts),
                                start.elapsed(),
                            )
                            .with_ranking(std::mem::take(&mut run.ranking));
                            let fingerprint = self.remember(original, prepared, &outcome);
                            self.run_post_build(&outcome);
                            outcome.with_fingerprint(fingerprint)
                        }
                    };
                    OrchestratorState::Terminal(Box::new(outcome))
                }

                OrchestratorState::PermanentFailure(failure) => {
                    warn!(
                        entry = %original.entry_point.display(),
                        class = %failure.class,
                        reason = %failure.message,
                        "build failed"
                    );
                    OrchestratorState::Terminal(Box::new(
                        BuildOutcome::failed(
                            &original.entry_point,
                            failure,
                            std::mem::take(&mut run.attempts),
                            start.elapsed(),
                        )
                        .with_ranking(std::mem::take(&mut run.ranking)),
                    ))
                }

                OrchestratorState::Terminal(outcome) => return *outcome,
            };
        }
    }

    /// One `Attempting(index)` transition
    fn step(&self, request: &BuildRequest, run: &mut Run, index: usize) -> OrchestratorState {
        if self.cancel.is_cancelled() {
            return OrchestratorState::PermanentFailure(Failure::from(&BuildError::Cancelled(
                "cancelled between attempts".to_string(),
            )));
        }
        let Some(candidate) = run.ranking.get(index) else {
            return OrchestratorState::PermanentFailure(Failure::from(&BuildError::Internal(
                format!("attempt index {} outside ranking", index),
            )));
        };
        let backend = candidate.backend;

        let attempt = self.attempt(backend, request);
        let verdict = attempt.verdict.unwrap_or(Verdict::FailedTransient);
        match verdict {
            Verdict::Succeeded => self.cache.record_attempt(backend, true),
            Verdict::FailedTransient | Verdict::TimedOut => self.cache.record_attempt(backend, false),
            _ => {}
        }
        let summary = last_line(&attempt.diagnostics);
        run.attempts.push(attempt);

        match verdict {
            Verdict::Succeeded => OrchestratorState::Succeeded { cached: None },
            v if v.allows_fallback() && index + 1 < run.ranking.len() => {
                info!(
                    from = %backend,
                    to = %run.ranking[index + 1].backend,
                    verdict = ?v,
                    "falling back to next backend"
                );
                OrchestratorState::Attempting(index + 1)
            }
            Verdict::FailedPermanent => {
                OrchestratorState::PermanentFailure(Failure::from(&BuildError::BackendPermanent {
                    backend,
                    reason: summary,
                }))
            }
            Verdict::Cancelled => OrchestratorState::PermanentFailure(Failure::from(
                &BuildError::Cancelled(format!("{} attempt interrupted", backend)),
            )),
            _ => OrchestratorState::PermanentFailure(exhausted(&run.attempts)),
        }
    }

    /// Prepare, invoke and interpret one backend
    fn attempt(&self, backend: BackendId, request: &BuildRequest) -> BuildAttempt {
        let Some(adapter) = self.adapters.get(backend) else {
            let mut attempt = BuildAttempt::begin(backend);
            let err = BuildError::BackendUnavailable {
                backend,
                reason: "no adapter registered".to_string(),
            };
            attempt.finish(
                Interpretation::new(Verdict::FailedTransient, err.to_string()),
                None,
                Duration::ZERO,
            );
            return attempt;
        };

        let spec = match adapter.prepare(request) {
            Ok(spec) => spec,
            Err(e) => {
                info!(backend = %backend, error = %e, "skipping backend");
                return BuildAttempt::skipped(backend, e.to_string());
            }
        };

        let mut attempt = BuildAttempt::begin(backend);
        attempt.start();
        info!(backend = %backend, command = %spec.process.display(), "invoking backend");
        let raw = adapter.invoke(&spec, request.timeout, &self.cancel);
        let interpretation = adapter.interpret(&spec, &raw);
        attempt.finish(interpretation, raw.exit_code, raw.elapsed);

        if attempt.succeeded() {
            info!(
                backend = %backend,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                "backend succeeded"
            );
        } else {
            warn!(
                backend = %backend,
                status = %attempt.status,
                exit_code = ?attempt.exit_code,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                "backend attempt failed"
            );
        }
        attempt
    }

    /// First valid cache entry over the backends this request may use
    fn lookup(&self, prepared: &Prepared) -> Option<CacheEntry> {
        let request = &prepared.request;
        let candidates = match request.backend.explicit() {
            Some(id) => vec![id],
            None => BackendId::all().to_vec(),
        };
        candidates
            .into_iter()
            .filter(|id| !request.excluded_backends.contains(id))
            .filter_map(|id| {
                let version = self.env.version(id)?;
                Some(prepared.digest.fingerprint(id, version, &self.env.host))
            })
            .find_map(|fingerprint| self.cache.lookup(&fingerprint))
    }

    /// Store a fresh success in the cache, returning its fingerprint
    fn remember(
        &self,
        original: &BuildRequest,
        prepared: &Prepared,
        outcome: &BuildOutcome,
    ) -> Option<String> {
        let backend = outcome.backend?;
        let artifact = outcome.artifact.clone()?;
        let version = self.env.version(backend).unwrap_or("unknown").to_string();
        let fingerprint = prepared.digest.fingerprint(backend, &version, &self.env.host);
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            backend,
            backend_version: version,
            entry_point: original.entry_point.clone(),
            artifact,
            created_at: Utc::now(),
            valid: true,
        };
        if let Err(e) = self.cache.store(entry) {
            warn!(fingerprint = %fingerprint, error = %e, "failed to persist cache entry");
        }
        Some(fingerprint)
    }

    fn run_post_build(&self, outcome: &BuildOutcome) {
        if self.post_build.is_empty() {
            return;
        }
        let (Some(backend), Some(artifact)) = (outcome.backend, outcome.artifact.as_deref()) else {
            return;
        };
        let handoff = match ArtifactHandoff::inspect(artifact, backend) {
            Ok(handoff) => handoff,
            Err(e) => {
                warn!(error = %e, "cannot inspect artifact for post-build hooks");
                return;
            }
        };
        for hook in &self.post_build {
            if let Err(e) = hook.after_build(&handoff) {
                warn!(error = %BuildError::hook(hook.name(), e), "post-build hook failed");
            }
        }
    }
}

/// Failure once every candidate was tried
fn exhausted(attempts: &[BuildAttempt]) -> Failure {
    let summary = attempts
        .iter()
        .map(|a| format!("{} {}", a.backend, a.status))
        .collect::<Vec<_>>()
        .join(", ");
    let all_skipped = attempts
        .iter()
        .all(|a| a.verdict == Some(Verdict::Skipped));
    if all_skipped {
        Failure {
            class: FailureClass::Configuration,
            message: format!("no candidate backend can express the requested options ({})", summary),
        }
    } else {
        Failure {
            class: FailureClass::Exhausted,
            message: format!("all {} candidate backends failed ({})", attempts.len(), summary),
        }
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("input rejected")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BackendAdapter, InvocationSpec};
    use crate::attempt::{AttemptStatus, OutcomeStatus};
    use crate::backend::Platform;
    use crate::process::{ProcessSpec, RawProcessResult, Termination};
    use crate::profile::ProjectProfile;
    use crate::scorer::CostEstimate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Adapter that writes the artifact itself instead of spawning a tool
    struct Scripted {
        id: BackendId,
        verdict: Verdict,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(id: BackendId, verdict: Verdict) -> Arc<Self> {
            Arc::new(Self {
                id,
                verdict,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl BackendAdapter for Scripted {
        fn id(&self) -> BackendId {
            self.id
        }

        fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec> {
            Ok(InvocationSpec {
                process: ProcessSpec::new(self.id.tool_name()),
                expected_artifact: request.output_dir.join(format!("{}-app", self.id)),
                warnings: Vec::new(),
            })
        }

        fn invoke(
            &self,
            spec: &InvocationSpec,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> RawProcessResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (exit_code, termination, stderr) = match self.verdict {
                Verdict::Succeeded => {
                    fs::write(&spec.expected_artifact, b"exe").unwrap();
                    (Some(0), Termination::Exited, "")
                }
                Verdict::FailedPermanent => (Some(1), Termination::Exited, "SyntaxError: bad"),
                Verdict::TimedOut => (None, Termination::TimedOut, ""),
                _ => (Some(1), Termination::Exited, "ImportError: nope"),
            };
            RawProcessResult {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
                elapsed: Duration::from_millis(5),
                termination,
            }
        }

        fn estimate_cost(&self, _profile: &ProjectProfile) -> CostEstimate {
            CostEstimate {
                seconds: 10.0,
                bytes: 1000,
            }
        }
    }

    fn project() -> (TempDir, BuildRequest) {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("main.py");
        fs::write(&entry, "import sys\nprint(sys.argv)\n").unwrap();
        let request = BuildRequest::new(&entry, dir.path().join("dist"));
        (dir, request)
    }

    fn orchestrator(installed: &[BackendId], adapters: Vec<Arc<Scripted>>) -> Orchestrator {
        let env = Environment::with_installed(Platform::host(), installed);
        let registry = adapters
            .into_iter()
            .fold(AdapterRegistry::new(), |r, a| r.with_adapter(a));
        Orchestrator::new(Arc::new(env)).with_adapters(registry)
    }

    #[test]
    fn test_first_candidate_succeeds() {
        let (_dir, request) = project();
        let translator = Scripted::new(BackendId::Translator, Verdict::Succeeded);
        let orch = orchestrator(&[BackendId::Translator], vec![translator.clone()]);
        let outcome = orch.build(&request);
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.fingerprint.is_some());
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_permanent_failure_stops_fallback() {
        let (_dir, request) = project();
        // A small console script ranks the translator first.
        let translator = Scripted::new(BackendId::Translator, Verdict::FailedPermanent);
        let bundler = Scripted::new(BackendId::Bundler, Verdict::Succeeded);
        let orch = orchestrator(
            &[BackendId::Bundler, BackendId::Translator],
            vec![bundler.clone(), translator],
        );
        let outcome = orch.build(&request);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.failure_class(), Some(FailureClass::Permanent));
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].backend, BackendId::Translator);
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.exit_code(), 3);
    }

    #[test]
    fn test_exhausted_keeps_every_attempt() {
        let (_dir, request) = project();
        let bundler = Scripted::new(BackendId::Bundler, Verdict::TimedOut);
        let translator = Scripted::new(BackendId::Translator, Verdict::FailedTransient);
        let orch = orchestrator(
            &[BackendId::Bundler, BackendId::Translator],
            vec![bundler, translator],
        );
        let outcome = orch.build(&request);
        assert_eq!(outcome.failure_class(), Some(FailureClass::Exhausted));
        let statuses: Vec<_> = outcome.attempts.iter().map(|a| a.status).collect();
        assert!(statuses.contains(&AttemptStatus::TimedOut));
        assert!(statuses.contains(&AttemptStatus::Failed));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.exit_code(), 4);
    }

    #[test]
    fn test_missing_entry_point_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let request = BuildRequest::new(dir.path().join("absent.py"), dir.path().join("dist"));
        let orch = orchestrator(&[BackendId::Bundler], vec![]);
        let outcome = orch.build(&request);
        assert_eq!(outcome.failure_class(), Some(FailureClass::Configuration));
        assert!(outcome.attempts.is_empty());
    }

    #[test]
    fn test_missing_adapter_falls_back() {
        let (_dir, request) = project();
        let freezer = Scripted::new(BackendId::Freezer, Verdict::Succeeded);
        let orch = orchestrator(
            &[BackendId::Bundler, BackendId::Freezer],
            vec![freezer],
        );
        let options = crate::request::BuildOptions {
            onefile: false,
            ..Default::default()
        };
        let outcome = orch.build(&request.with_options(options));
        assert_eq!(outcome.status, OutcomeStatus::SucceededWithFallback);
        assert_eq!(outcome.attempts[0].backend, BackendId::Bundler);
        assert!(outcome.attempts[0].diagnostics.contains("no adapter registered"));
    }

    #[test]
    fn test_pre_transform_changes_fingerprint() {
        struct Append;
        impl PreTransformHook for Append {
            fn name(&self) -> &str {
                "append"
            }
            fn transform(
                &self,
                entry_point: &std::path::Path,
                work_dir: &std::path::Path,
            ) -> Result<std::path::PathBuf, String> {
                let mut source = fs::read_to_string(entry_point).map_err(|e| e.to_string())?;
                source.push_str("# protected\n");
                let out = work_dir.join("main.py");
                fs::write(&out, source).map_err(|e| e.to_string())?;
                Ok(out)
            }
        }

        let (_dir, request) = project();
        let plain = orchestrator(
            &[BackendId::Translator],
            vec![Scripted::new(BackendId::Translator, Verdict::Succeeded)],
        )
        .build(&request);
        let protected = orchestrator(
            &[BackendId::Translator],
            vec![Scripted::new(BackendId::Translator, Verdict::Succeeded)],
        )
        .with_pre_transform(Arc::new(Append))
        .build(&request);

        assert!(plain.is_success() && protected.is_success());
        assert_ne!(plain.fingerprint, protected.fingerprint);
        assert_eq!(protected.entry_point, request.entry_point);
    }

    #[test]
    fn test_failing_pre_transform_is_configuration_error() {
        struct Broken;
        impl PreTransformHook for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn transform(
                &self,
                _entry_point: &std::path::Path,
                _work_dir: &std::path::Path,
            ) -> Result<std::path::PathBuf, String> {
                Err("license expired".to_string())
            }
        }

        let (_dir, request) = project();
        let outcome = orchestrator(&[BackendId::Translator], vec![])
            .with_pre_transform(Arc::new(Broken))
            .build(&request);
        assert_eq!(outcome.failure_class(), Some(FailureClass::Configuration));
        assert!(outcome
            .failure
            .as_ref()
            .is_some_and(|f| f.message.contains("license expired")));
    }

    #[test]
    fn test_post_build_hook_receives_artifact() {
        struct Record(std::sync::Mutex<Vec<ArtifactHandoff>>);
        impl PostBuildHook for Record {
            fn name(&self) -> &str {
                "record"
            }
            fn after_build(&self, handoff: &ArtifactHandoff) -> Result<(), String> {
                self.0.lock().unwrap().push(handoff.clone());
                Ok(())
            }
        }

        let (_dir, request) = project();
        let hook = Arc::new(Record(std::sync::Mutex::new(Vec::new())));
        let outcome = orchestrator(
            &[BackendId::Translator],
            vec![Scripted::new(BackendId::Translator, Verdict::Succeeded)],
        )
        .with_post_build(hook.clone())
        .build(&request);

        let seen = hook.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(Some(seen[0].path.clone()), outcome.artifact);
        assert_eq!(seen[0].size_bytes, 3);
    }

    #[test]
    fn test_cancelled_orchestrator_makes_no_attempts() {
        let (_dir, request) = project();
        let translator = Scripted::new(BackendId::Translator, Verdict::Succeeded);
        let orch = orchestrator(&[BackendId::Translator], vec![translator.clone()]);
        orch.cancellation().cancel();
        let outcome = orch.build(&request);
        assert_eq!(outcome.failure_class(), Some(FailureClass::Cancelled));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("a\nSyntaxError: x\n\n"), "SyntaxError: x");
        assert_eq!(last_line(""), "input rejected");
    }
}
