//! Parallel build coordination
//!
//! Runs independent requests on a bounded rayon pool. Each request writes
//! under its own output subdirectory, a panic inside one orchestrator run
//! becomes a failed outcome for that request only, and outcomes come back in
//! input order.

use crate::attempt::BuildOutcome;
use crate::cache::short_hash;
use crate::orchestrator::Orchestrator;
use crate::request::{file_stem, BuildRequest};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default pool size
pub fn default_max_workers() -> usize {
    num_cpus::get().max(1)
}

/// Runs many orchestrations at once
pub struct Coordinator {
    orchestrator: Arc<Orchestrator>,
    stop_on_error: bool,
    partition_outputs: bool,
}

impl Coordinator {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            stop_on_error: false,
            partition_outputs: true,
        }
    }

    /// Resolve queued requests as cancelled after the first failure
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Give every request its own output subdirectory (on by default)
    pub fn with_partitioned_outputs(mut self, partition: bool) -> Self {
        self.partition_outputs = partition;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Build every request with at most `max_workers` running at once
    ///
    /// The returned outcomes line up with `requests`.
    pub fn run_all(&self, requests: &[BuildRequest], max_workers: usize) -> Vec<BuildOutcome> {
        let workers = max_workers.max(1);
        let requests: Vec<BuildRequest> = requests
            .iter()
            .map(|r| self.partition(r))
            .collect();
        info!(requests = requests.len(), workers, "starting batch");

        let halted = AtomicBool::new(false);
        let run = |request: &BuildRequest| self.run_one(request, &halted);

        let outcomes = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pyforge-worker-{}", i))
            .build()
        {
            Ok(pool) => pool.install(|| requests.par_iter().map(run).collect::<Vec<_>>()),
            Err(e) => {
                warn!(error = %e, "cannot start worker pool, building sequentially");
                requests.iter().map(run).collect()
            }
        };

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            requests = outcomes.len(),
            succeeded = outcomes.len() - failed,
            failed,
            "batch finished"
        );
        outcomes
    }

    fn run_one(&self, request: &BuildRequest, halted: &AtomicBool) -> BuildOutcome {
        if self.orchestrator.cancellation().is_cancelled() {
            return BuildOutcome::cancelled(&request.entry_point, "cancelled before start");
        }
        if halted.load(Ordering::SeqCst) {
            return BuildOutcome::cancelled(
                &request.entry_point,
                "skipped after an earlier build failed",
            );
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.orchestrator.build(request)
        })) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    entry = %request.entry_point.display(),
                    panic = %message,
                    "orchestrator fault isolated"
                );
                BuildOutcome::internal(&request.entry_point, message)
            }
        };

        if self.stop_on_error && !outcome.is_success() {
            halted.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Output path `<out>/<stem>-<hash>` unique per entry point and option set
    fn partition(&self, request: &BuildRequest) -> BuildRequest {
        if !self.partition_outputs {
            return request.clone();
        }
        let subdir = partition_name(request);
        request
            .clone()
            .with_output_dir(request.output_dir.join(subdir))
    }
}

/// Subdirectory name for a request
///
/// Hashes the absolute entry point together with everything in the build key
/// except source content, so differently configured builds of one script
/// never share a work directory while edits to the script keep the same one.
pub fn partition_name(request: &BuildRequest) -> String {
    let entry_point = &request.entry_point;
    let absolute = if entry_point.is_absolute() {
        entry_point.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(entry_point))
            .unwrap_or_else(|_| PathBuf::from(entry_point))
    };
    let variant = serde_json::to_string(&(
        &request.options,
        &request.backend,
        &request.excluded_backends,
        request.priority,
    ))
    .unwrap_or_default();
    format!(
        "{}-{}",
        file_stem(entry_point),
        short_hash(&format!("{}\0{}", absolute.to_string_lossy(), variant))
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("orchestrator panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("orchestrator panicked: {}", s)
    } else {
        "orchestrator panicked".to_string()
    }
}
