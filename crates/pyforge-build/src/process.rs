//! Isolated backend process execution
//!
//! Runs an external tool as its own process group with output capture, a
//! wall-clock timeout and cancellation. On timeout or cancellation the whole
//! process group is killed and reaped, so no grandchild outlives the attempt.

use crate::cancel::CancellationToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A fully resolved command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Shell-like rendering for logs and diagnostics
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| {
            if a.contains(' ') {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

/// How the process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum Termination {
    /// Process exited on its own
    Exited,
    /// Process exceeded its wall-clock budget and was killed
    TimedOut,
    /// Cancellation was requested and the process was killed
    Cancelled,
    /// The process could not be started
    SpawnFailed(String),
}

/// Raw result of one process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProcessResult {
    /// Exit code (None when killed or never started)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub termination: Termination,
}

impl RawProcessResult {
    /// Check if the process exited successfully
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }

    /// Get combined output
    pub fn output(&self) -> String {
        let mut output = String::new();
        if !self.stdout.is_empty() {
            output.push_str("STDOUT:\n");
            output.push_str(&self.stdout);
            output.push('\n');
        }
        if !self.stderr.is_empty() {
            output.push_str("STDERR:\n");
            output.push_str(&self.stderr);
        }
        output
    }
}

/// Runs processes with a timeout, polling for exit and cancellation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
        }
    }

    /// Run `spec` to completion, or until `timeout` elapses or `cancel` fires
    pub fn run(
        &self,
        spec: &ProcessSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RawProcessResult {
        let start = Instant::now();
        debug!(command = %spec.display(), timeout_ms = timeout.as_millis() as u64, "spawning backend process");

        if cancel.is_cancelled() {
            return RawProcessResult {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
                termination: Termination::Cancelled,
            };
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        isolate(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RawProcessResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed: start.elapsed(),
                    termination: Termination::SpawnFailed(e.to_string()),
                };
            }
        };

        let stdout_reader = capture(child.stdout.take());
        let stderr_reader = capture(child.stderr.take());

        let (exit_code, termination) = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // The leader is gone; reap anything it left in its group.
                    kill_tree(&mut child);
                    break (status.code(), Termination::Exited);
                }
                Ok(None) => {
                    if cancel.is_cancelled() {
                        kill_tree(&mut child);
                        let _ = child.wait();
                        break (None, Termination::Cancelled);
                    }
                    if start.elapsed() >= timeout {
                        warn!(command = %spec.display(), "backend process timed out, killing process group");
                        kill_tree(&mut child);
                        let _ = child.wait();
                        break (None, Termination::TimedOut);
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    kill_tree(&mut child);
                    let _ = child.wait();
                    break (None, Termination::SpawnFailed(e.to_string()));
                }
            }
        };

        let stdout = join_capture(stdout_reader);
        let stderr = join_capture(stderr_reader);
        let elapsed = start.elapsed();
        debug!(
            command = %spec.display(),
            exit_code = ?exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "backend process finished"
        );

        RawProcessResult {
            exit_code,
            stdout,
            stderr,
            elapsed,
            termination,
        }
    }
}

/// Put the child in its own process group so the whole tree can be signalled
#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

/// Kill the child's process group (unix) or the child itself
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: signalling a process group we created; ESRCH is harmless.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_capture(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}
