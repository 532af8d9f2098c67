//! Shared fixtures for integration tests

#![allow(dead_code)]

use pyforge_build::{
    AdapterRegistry, BackendAdapter, BackendId, BuildRequest, BuildResult, CancellationToken,
    CostEstimate, Environment, InvocationSpec, Orchestrator, Platform, ProcessSpec,
    ProjectProfile, RawProcessResult, Termination,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// What a mock backend does when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    FailTransient,
    FailPermanent,
    TimeOut,
    Panic,
}

/// Tracks how many invocations overlap
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Backend adapter that fakes the tool in-process
pub struct MockBackend {
    id: BackendId,
    behavior: Behavior,
    delay: Duration,
    gauge: Option<Arc<Gauge>>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(id: BackendId, behavior: Behavior) -> Self {
        Self {
            id,
            behavior,
            delay: Duration::ZERO,
            gauge: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl BackendAdapter for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn prepare(&self, request: &BuildRequest) -> BuildResult<InvocationSpec> {
        Ok(InvocationSpec {
            process: ProcessSpec::new(self.id.tool_name()),
            expected_artifact: request
                .output_dir
                .join(format!("{}-{}", request.output_name(), self.id)),
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
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }

        let (exit_code, termination, stderr) = match self.behavior {
            Behavior::Succeed => {
                fs::write(&spec.expected_artifact, b"native").unwrap();
                (Some(0), Termination::Exited, "")
            }
            Behavior::FailTransient => (
                Some(1),
                Termination::Exited,
                "ModuleNotFoundError: No module named 'helper'",
            ),
            Behavior::FailPermanent => (
                Some(1),
                Termination::Exited,
                "  File \"main.py\", line 1\nSyntaxError: invalid syntax",
            ),
            Behavior::TimeOut => (None, Termination::TimedOut, ""),
            Behavior::Panic => panic!("{} adapter exploded", self.id),
        };
        RawProcessResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            elapsed: self.delay,
            termination,
        }
    }

    fn estimate_cost(&self, _profile: &ProjectProfile) -> CostEstimate {
        CostEstimate {
            seconds: 30.0,
            bytes: 10 * 1024 * 1024,
        }
    }
}

/// Temporary project with one entry point
pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    /// A small console script
    pub fn console() -> Self {
        Self::with_source("main.py", "import sys\n\nprint(sys.argv[1:])\n")
    }

    /// A tkinter application
    pub fn gui() -> Self {
        Self::with_source(
            "app.py",
            "import tkinter as tk\n\nroot = tk.Tk()\nroot.mainloop()\n",
        )
    }

    pub fn with_source(name: &str, source: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(name), source).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Add another script next to the first
    pub fn add_script(&self, name: &str, source: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, source).unwrap();
        path
    }

    pub fn request(&self, name: &str) -> BuildRequest {
        BuildRequest::new(self.path().join(name), self.path().join("dist"))
    }
}

/// Orchestrator over a synthetic environment with the given adapters
pub fn orchestrator(installed: &[BackendId], adapters: &[Arc<MockBackend>]) -> Orchestrator {
    let env = Environment::with_installed(Platform::host(), installed);
    let registry = adapters.iter().fold(AdapterRegistry::new(), |r, a| {
        r.with_adapter(a.clone() as Arc<dyn BackendAdapter>)
    });
    Orchestrator::new(Arc::new(env)).with_adapters(registry)
}
