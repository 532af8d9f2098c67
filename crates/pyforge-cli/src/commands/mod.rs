pub mod analyze;
pub mod backends;
pub mod batch;
pub mod build;
pub mod cache;

use anyhow::{Context as _, Result};
use clap::Args;
use pyforge_build::{
    BackendId, BackendPreference, BuildCache, BuildOutcome, BuildRequest, CancellationToken,
    DataMapping, Environment, Orchestrator, Priority,
};
use pyforge_config::{Config, ConfigLoader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Everything a command needs besides its own arguments
pub struct Context {
    pub config: Config,
    pub cancel: CancellationToken,
    pub json: bool,
    pub quiet: bool,
}

/// Build options shared by `build` and `batch`
///
/// Flags override the project and global configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct BuildFlags {
    /// Output directory (default: dist)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Backend: auto, pyinstaller, nuitka or cx_freeze
    #[arg(long, short = 'b')]
    pub backend: Option<String>,

    /// Never use this backend (repeatable)
    #[arg(long = "exclude-backend", value_name = "BACKEND")]
    pub exclude_backend: Vec<String>,

    /// balanced, speed, size or compatibility
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// Single-file executable (the default)
    #[arg(long, conflicts_with = "onedir")]
    pub onefile: bool,

    /// Directory bundle instead of a single file
    #[arg(long)]
    pub onedir: bool,

    /// GUI application without a console window
    #[arg(long, short = 'w')]
    pub windowed: bool,

    /// Executable icon
    #[arg(long)]
    pub icon: Option<PathBuf>,

    /// Executable name (default: script name)
    #[arg(long)]
    pub name: Option<String>,

    /// Module to leave out (repeatable)
    #[arg(long, value_name = "MODULE")]
    pub exclude_module: Vec<String>,

    /// Module to force in (repeatable)
    #[arg(long, value_name = "MODULE")]
    pub hidden_import: Vec<String>,

    /// Extra data as SRC=DEST (repeatable)
    #[arg(long, value_name = "SRC=DEST")]
    pub add_data: Vec<String>,

    /// Per-backend timeout in seconds
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Let backends drop options they cannot express
    #[arg(long)]
    pub accept_option_loss: bool,

    /// Ignore cached builds (results are still cached)
    #[arg(long)]
    pub no_cache: bool,
}

impl BuildFlags {
    /// Request for `script` with config defaults overridden by these flags
    pub fn request(&self, script: &Path, config: &Config) -> Result<BuildRequest> {
        let mut options = config.build_options();
        if self.onefile {
            options.onefile = true;
        }
        if self.onedir {
            options.onefile = false;
        }
        if self.windowed {
            options.windowed = true;
        }
        if let Some(icon) = &self.icon {
            options.icon = Some(icon.clone());
        }
        if let Some(name) = &self.name {
            options.output_name = Some(name.clone());
        }
        options.excludes.extend(self.exclude_module.iter().cloned());
        options.hidden_imports.extend(self.hidden_import.iter().cloned());
        for mapping in &self.add_data {
            let mapping = DataMapping::parse(mapping).map_err(anyhow::Error::msg)?;
            options.extra_data.insert(mapping);
        }
        if self.accept_option_loss {
            options.accept_option_loss = true;
        }

        let backend = match &self.backend {
            Some(name) => BackendPreference::parse(name).map_err(anyhow::Error::msg)?,
            None => config.backend(),
        };
        let priority = match &self.priority {
            Some(name) => name.parse::<Priority>().map_err(anyhow::Error::msg)?,
            None => config.priority(),
        };
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.timeout());
        let output = self.output.clone().unwrap_or_else(|| config.output_dir());

        let mut request = BuildRequest::new(script, output)
            .with_backend(backend)
            .with_priority(priority)
            .with_options(options)
            .with_timeout(timeout)
            .with_skip_cache_lookup(self.no_cache);
        let mut excluded = config.excluded_backends();
        for name in &self.exclude_backend {
            excluded.insert(name.parse::<BackendId>().map_err(anyhow::Error::msg)?);
        }
        // An explicit backend wins over configured exclusions
        if let Some(id) = backend.explicit() {
            if !self
                .exclude_backend
                .iter()
                .any(|n| n.parse::<BackendId>().ok() == Some(id))
            {
                excluded.remove(&id);
            }
        }
        for id in excluded {
            request = request.excluding(id);
        }
        Ok(request)
    }
}

/// Load layered configuration from the working directory or `path`
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    let config = match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load configuration")?
        }
    };
    Ok(config)
}

/// Probe the host for backends
pub fn environment(config: &Config) -> Arc<Environment> {
    Arc::new(Environment::detect(config.tool_paths()))
}

/// Persistent cache, or an in-memory one when disabled or unusable
pub fn open_cache(config: &Config) -> Arc<BuildCache> {
    let Some(dir) = config.cache_dir() else {
        return Arc::new(BuildCache::in_memory());
    };
    match BuildCache::open(&dir) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cache unavailable, using an in-memory cache");
            Arc::new(BuildCache::in_memory())
        }
    }
}

/// Orchestrator over the probed environment and configured cache
pub fn orchestrator(ctx: &Context) -> Orchestrator {
    Orchestrator::new(environment(&ctx.config))
        .with_cache(open_cache(&ctx.config))
        .with_cancellation(ctx.cancel.clone())
}

/// Human-readable report of one outcome
pub fn print_outcome(outcome: &BuildOutcome) {
    println!("\n{}", "=".repeat(60));
    let entry = outcome.entry().display();
    match (&outcome.artifact, outcome.backend) {
        (Some(artifact), Some(backend)) if outcome.is_success() => {
            let source = if outcome.from_cache { " (cached)" } else { "" };
            println!(
                "Built {} with {}{} in {:.2}s",
                entry,
                backend,
                source,
                outcome.elapsed.as_secs_f64()
            );
            println!("{}", "=".repeat(60));
            println!("  Artifact: {}", artifact.display());
        }
        _ => {
            println!("Build of {} {}", entry, outcome.status);
            println!("{}", "=".repeat(60));
            if let Some(failure) = &outcome.failure {
                println!("  Reason: {} ({})", failure.message, failure.class);
            }
        }
    }
    for attempt in &outcome.attempts {
        println!(
            "  {:<11} {:<10} {:>7.2}s",
            attempt.backend.to_string(),
            attempt.status.to_string(),
            attempt.elapsed.as_secs_f64()
        );
        if !attempt.succeeded() {
            if let Some(line) = attempt.diagnostics.lines().rev().find(|l| !l.trim().is_empty()) {
                println!("              {}", line.trim());
            }
        }
    }
    println!("{}", "=".repeat(60));
}

/// Exit status for an outcome
pub fn exit_status(outcome: &BuildOutcome) -> u8 {
    u8::try_from(outcome.exit_code()).unwrap_or(u8::MAX)
}
