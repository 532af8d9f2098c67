//! Build attempts and terminal outcomes
//!
//! One [`BuildAttempt`] is recorded per ranked candidate the orchestrator
//! reaches, in order. A [`BuildOutcome`] is the immutable result of one
//! request and serializes to the record printed by `--json`.

use crate::backend::BackendId;
use crate::error::BuildError;
use crate::scorer::BackendScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle of one backend attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    /// Never invoked, e.g. the backend could not express a requested option
    Skipped,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed-out"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Adapter classification of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Succeeded,
    /// Backend-side problem; another backend may succeed
    FailedTransient,
    /// Input-side problem; every backend would fail the same way
    FailedPermanent,
    TimedOut,
    Cancelled,
    /// Rejected before invocation
    Skipped,
}

impl Verdict {
    /// Attempt status this verdict records
    pub fn status(&self) -> AttemptStatus {
        match self {
            Self::Succeeded => AttemptStatus::Succeeded,
            Self::TimedOut => AttemptStatus::TimedOut,
            Self::Skipped => AttemptStatus::Skipped,
            Self::FailedTransient | Self::FailedPermanent | Self::Cancelled => {
                AttemptStatus::Failed
            }
        }
    }

    /// Whether the orchestrator advances to the next candidate
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::FailedTransient | Self::TimedOut | Self::Skipped)
    }
}

/// Result of interpreting one process run
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub verdict: Verdict,
    /// Artifact path when the build succeeded
    pub artifact: Option<PathBuf>,
    /// Human-readable explanation plus captured output
    pub diagnostics: String,
}

impl Interpretation {
    pub fn new(verdict: Verdict, diagnostics: impl Into<String>) -> Self {
        Self {
            verdict,
            artifact: None,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn succeeded(artifact: PathBuf, diagnostics: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Succeeded,
            artifact: Some(artifact),
            diagnostics: diagnostics.into(),
        }
    }
}

/// One backend tried within a request's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildAttempt {
    pub backend: BackendId,
    pub started_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub verdict: Option<Verdict>,
    pub exit_code: Option<i32>,
    /// Invocation, warnings and captured output
    pub diagnostics: String,
    pub artifact: Option<PathBuf>,
    #[serde(with = "duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

impl BuildAttempt {
    /// Start a new attempt
    pub fn begin(backend: BackendId) -> Self {
        Self {
            backend,
            started_at: Utc::now(),
            status: AttemptStatus::Pending,
            verdict: None,
            exit_code: None,
            diagnostics: String::new(),
            artifact: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Zero-duration attempt for a candidate that was never invoked
    pub fn skipped(backend: BackendId, reason: impl Into<String>) -> Self {
        let mut attempt = Self::begin(backend);
        attempt.finish(Interpretation::new(Verdict::Skipped, reason), None, Duration::ZERO);
        attempt
    }

    /// Mark the attempt as running
    pub fn start(&mut self) {
        self.status = AttemptStatus::Running;
    }

    /// Record the adapter's interpretation
    pub fn finish(
        &mut self,
        interpretation: Interpretation,
        exit_code: Option<i32>,
        elapsed: Duration,
    ) {
        self.status = interpretation.verdict.status();
        self.verdict = Some(interpretation.verdict);
        self.artifact = interpretation.artifact;
        self.diagnostics = interpretation.diagnostics;
        self.exit_code = exit_code;
        self.elapsed = elapsed;
    }

    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Succeeded
    }
}

/// Final status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Succeeded,
    SucceededWithFallback,
    Failed,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithFallback => write!(f, "succeeded-with-fallback"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a request failed, one variant per exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// No compatible backend, invalid option combination, hook failure
    Configuration,
    /// A backend reported the input itself is invalid
    Permanent,
    /// Every candidate failed transiently or timed out
    Exhausted,
    Cancelled,
    /// Unexpected fault inside the orchestrator
    Internal,
}

impl FailureClass {
    /// Process exit code for this class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::Permanent => 3,
            Self::Exhausted => 4,
            Self::Cancelled => 5,
            Self::Internal => 6,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Permanent => write!(f, "permanent"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub class: FailureClass,
    pub message: String,
}

impl From<&BuildError> for Failure {
    fn from(err: &BuildError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Terminal record of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub entry_point: PathBuf,
    pub status: OutcomeStatus,
    /// Backend that produced the artifact
    pub backend: Option<BackendId>,
    pub artifact: Option<PathBuf>,
    pub attempts: Vec<BuildAttempt>,
    #[serde(with = "duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub failure: Option<Failure>,
    /// Served from the build cache without invoking a backend
    pub from_cache: bool,
    pub fingerprint: Option<String>,
    /// Ranking the attempts followed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranking: Vec<BackendScore>,
}

impl BuildOutcome {
    /// Outcome for a request that failed before any attempt
    pub fn rejected(entry_point: impl Into<PathBuf>, err: &BuildError, elapsed: Duration) -> Self {
        Self::failed(entry_point, Failure::from(err), Vec::new(), elapsed)
    }

    /// Outcome for a request resolved by cancellation
    pub fn cancelled(entry_point: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::rejected(
            entry_point,
            &BuildError::Cancelled(reason.into()),
            Duration::ZERO,
        )
    }

    /// Outcome for a request whose orchestrator faulted
    pub fn internal(entry_point: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::rejected(
            entry_point,
            &BuildError::Internal(message.into()),
            Duration::ZERO,
        )
    }

    /// Outcome served from the cache
    pub fn cached(
        entry_point: impl Into<PathBuf>,
        backend: BackendId,
        artifact: PathBuf,
        fingerprint: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            entry_point: entry_point.into(),
            status: OutcomeStatus::Succeeded,
            backend: Some(backend),
            artifact: Some(artifact),
            attempts: Vec::new(),
            elapsed,
            failure: None,
            from_cache: true,
            fingerprint: Some(fingerprint),
            ranking: Vec::new(),
        }
    }

    /// This outcome as seen by a caller that waited on the same build
    ///
    /// A success is reported like a cache hit; a failure keeps every attempt.
    pub fn shared_with(&self, entry_point: impl Into<PathBuf>, elapsed: Duration) -> Self {
        let mut outcome = self.clone();
        outcome.entry_point = entry_point.into();
        outcome.elapsed = elapsed;
        if outcome.is_success() {
            outcome.status = OutcomeStatus::Succeeded;
            outcome.attempts.clear();
            outcome.ranking.clear();
            outcome.from_cache = true;
        }
        outcome
    }

    /// Outcome whose last attempt succeeded
    pub fn succeeded(
        entry_point: impl Into<PathBuf>,
        attempts: Vec<BuildAttempt>,
        elapsed: Duration,
    ) -> Self {
        let last = attempts.last();
        let backend = last.map(|a| a.backend);
        let artifact = last.and_then(|a| a.artifact.clone());
        let status = if attempts.len() > 1 {
            OutcomeStatus::SucceededWithFallback
        } else {
            OutcomeStatus::Succeeded
        };
        Self {
            entry_point: entry_point.into(),
            status,
            backend,
            artifact,
            attempts,
            elapsed,
            failure: None,
            from_cache: false,
            fingerprint: None,
            ranking: Vec::new(),
        }
    }

    /// Failed outcome carrying every attempt made
    pub fn failed(
        entry_point: impl Into<PathBuf>,
        failure: Failure,
        attempts: Vec<BuildAttempt>,
        elapsed: Duration,
    ) -> Self {
        Self {
            entry_point: entry_point.into(),
            status: OutcomeStatus::Failed,
            backend: None,
            artifact: None,
            attempts,
            elapsed,
            failure: Some(failure),
            from_cache: false,
            fingerprint: None,
            ranking: Vec::new(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_ranking(mut self, ranking: Vec<BackendScore>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The attempt that produced the artifact
    pub fn successful_attempt(&self) -> Option<&BuildAttempt> {
        self.attempts.iter().rev().find(|a| a.succeeded())
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        self.failure.as_ref().map(|f| f.class)
    }

    /// Process exit code: 0 on success, otherwise the failure class code
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            _ if self.is_success() => 0,
            Some(failure) => failure.class.exit_code(),
            None => FailureClass::Internal.exit_code(),
        }
    }

    /// Pretty JSON record
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Entry point as a path
    pub fn entry(&self) -> &Path {
        &self.entry_point
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn finished(backend: BackendId, verdict: Verdict) -> BuildAttempt {
        let mut attempt = BuildAttempt::begin(backend);
        attempt.start();
        let interpretation = if verdict == Verdict::Succeeded {
            Interpretation::succeeded(PathBuf::from("dist/app"), "ok")
        } else {
            Interpretation::new(verdict, "boom")
        };
        attempt.finish(interpretation, Some(1), Duration::from_millis(40));
        attempt
    }

    #[test]
    fn test_single_success_is_plain_success() {
        let outcome = BuildOutcome::succeeded(
            "main.py",
            vec![finished(BackendId::Bundler, Verdict::Succeeded)],
            Duration::from_secs(1),
        );
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.backend, Some(BackendId::Bundler));
        assert_eq!(outcome.artifact, Some(PathBuf::from("dist/app")));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_shared_outcome_for_waiting_caller() {
        let success = BuildOutcome::succeeded(
            "a/main.py",
            vec![
                finished(BackendId::Bundler, Verdict::FailedTransient),
                finished(BackendId::Translator, Verdict::Succeeded),
            ],
            Duration::from_secs(2),
        );
        let shared = success.shared_with("b/main.py", Duration::from_millis(5));
        assert_eq!(shared.entry_point, PathBuf::from("b/main.py"));
        assert_eq!(shared.status, OutcomeStatus::Succeeded);
        assert_eq!(shared.artifact, success.artifact);
        assert!(shared.from_cache);
        assert!(shared.attempts.is_empty());

        let failure = BuildOutcome::failed(
            "a/main.py",
            Failure {
                class: FailureClass::Exhausted,
                message: "every backend failed".to_string(),
            },
            vec![finished(BackendId::Bundler, Verdict::FailedTransient)],
            Duration::from_secs(1),
        );
        let shared = failure.shared_with("b/main.py", Duration::from_millis(5));
        assert_eq!(shared.status, OutcomeStatus::Failed);
        assert_eq!(shared.attempts, failure.attempts);
        assert_eq!(shared.exit_code(), 4);
        assert!(!shared.from_cache);
    }

    #[test]
    fn test_success_after_failure_is_fallback() {
        let outcome = BuildOutcome::succeeded(
            "main.py",
            vec![
                finished(BackendId::Bundler, Verdict::FailedTransient),
                finished(BackendId::Translator, Verdict::Succeeded),
            ],
            Duration::from_secs(2),
        );
        assert_eq!(outcome.status, OutcomeStatus::SucceededWithFallback);
        assert_eq!(
            outcome.successful_attempt().map(|a| a.backend),
            Some(BackendId::Translator)
        );
    }

    #[test]
    fn test_exit_codes_per_class() {
        let cases = [
            (FailureClass::Configuration, 2),
            (FailureClass::Permanent, 3),
            (FailureClass::Exhausted, 4),
            (FailureClass::Cancelled, 5),
            (FailureClass::Internal, 6),
        ];
        for (class, code) in cases {
            let outcome = BuildOutcome::failed(
                "main.py",
                Failure {
                    class,
                    message: "x".to_string(),
                },
                Vec::new(),
                Duration::ZERO,
            );
            assert_eq!(outcome.exit_code(), code);
        }
    }

    #[test]
    fn test_skipped_attempt_has_zero_duration() {
        let attempt = BuildAttempt::skipped(BackendId::Freezer, "cannot express onefile");
        assert_eq!(attempt.status, AttemptStatus::Skipped);
        assert_eq!(attempt.elapsed, Duration::ZERO);
        assert!(attempt.verdict.is_some_and(|v| v.allows_fallback()));
    }

    #[test]
    fn test_verdict_fallback_rules() {
        assert!(Verdict::FailedTransient.allows_fallback());
        assert!(Verdict::TimedOut.allows_fallback());
        assert!(!Verdict::FailedPermanent.allows_fallback());
        assert!(!Verdict::Cancelled.allows_fallback());
        assert_eq!(Verdict::TimedOut.status(), AttemptStatus::TimedOut);
    }

    #[test]
    fn test_record_serializes_status_and_attempts() {
        let outcome = BuildOutcome::succeeded(
            "main.py",
            vec![finished(BackendId::Bundler, Verdict::Succeeded)],
            Duration::from_millis(1500),
        );
        let value: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["backend"], "bundler");
        assert_eq!(value["elapsed_ms"], 1500);
        assert_eq!(value["attempts"][0]["status"], "succeeded");
    }

    #[test]
    fn test_cancelled_outcome() {
        let outcome = BuildOutcome::cancelled("main.py", "interrupted");
        assert_eq!(outcome.failure_class(), Some(FailureClass::Cancelled));
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.exit_code(), 5);
    }
}
