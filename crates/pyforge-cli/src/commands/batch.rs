//! Batch command - many entry points on a bounded worker pool

use super::{exit_status, orchestrator, BuildFlags, Context};
use anyhow::{bail, Context as _, Result};
use pyforge_build::{BuildOutcome, Coordinator};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// Directories never searched for entry points
const SKIPPED_DIRS: &[&str] = &[
    "__pycache__",
    "build",
    "dist",
    "venv",
    ".venv",
    "env",
    "node_modules",
    "site-packages",
];

/// Batch command arguments
#[derive(Debug, Default)]
pub struct BatchArgs {
    pub scripts: Vec<PathBuf>,
    pub files_from: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub stop_on_error: bool,
}

/// Run the batch command
pub fn run(ctx: &Context, args: &BatchArgs, flags: &BuildFlags) -> Result<u8> {
    let targets = discover(args, &ctx.config.targets())?;
    if targets.is_empty() {
        bail!("No entry points to build: pass scripts, --files-from, --directory or set [build] targets");
    }

    let requests = targets
        .iter()
        .map(|script| flags.request(script, &ctx.config))
        .collect::<Result<Vec<_>>>()?;
    let workers = args.max_workers.unwrap_or_else(|| ctx.config.max_workers());

    let coordinator = Coordinator::new(Arc::new(orchestrator(ctx)))
        .with_stop_on_error(args.stop_on_error);
    let outcomes = coordinator.run_all(&requests, workers);

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcomes).context("Failed to serialize outcomes")?
        );
    } else if !ctx.quiet || outcomes.iter().any(|o| !o.is_success()) {
        print_summary(&outcomes);
    }

    Ok(outcomes.iter().map(exit_status).max().unwrap_or(0))
}

/// Entry points from every source, in order, without duplicates
fn discover(args: &BatchArgs, configured: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut targets: Vec<PathBuf> = args.scripts.clone();

    if let Some(list) = &args.files_from {
        let content = fs::read_to_string(list)
            .with_context(|| format!("Failed to read {}", list.display()))?;
        let base = list.parent().unwrap_or(Path::new("."));
        targets.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|l| {
                    let path = PathBuf::from(l);
                    if path.is_relative() {
                        base.join(path)
                    } else {
                        path
                    }
                }),
        );
    }

    if let Some(dir) = &args.directory {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        targets.extend(runnable_scripts(dir));
    }

    if targets.is_empty() {
        targets.extend(configured.iter().cloned());
    }

    let mut seen = BTreeSet::new();
    targets.retain(|t| seen.insert(t.clone()));
    Ok(targets)
}

/// Python files under `dir` guarded by `if __name__ == "__main__"`
fn runnable_scripts(dir: &Path) -> Vec<PathBuf> {
    let mut scripts: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
        .filter(|p| fs::read_to_string(p).is_ok_and(|source| has_main_guard(&source)))
        .collect();
    scripts.sort();
    scripts
}

fn skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && (name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()))
}

fn has_main_guard(source: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim();
        line.starts_with("if __name__")
            && (line.contains("\"__main__\"") || line.contains("'__main__'"))
    })
}

fn print_summary(outcomes: &[BuildOutcome]) {
    println!("\n{}", "=".repeat(60));
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    println!("Batch: {} of {} built", succeeded, outcomes.len());
    println!("{}", "=".repeat(60));
    for outcome in outcomes {
        let detail = match (&outcome.artifact, &outcome.failure) {
            (Some(artifact), _) => artifact.display().to_string(),
            (None, Some(failure)) => failure.message.clone(),
            (None, None) => String::new(),
        };
        let backend = outcome
            .backend
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<24} {:<10} {}",
            outcome.entry().display().to_string(),
            outcome.status.to_string(),
            backend,
            detail
        );
    }
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_main_guard_detection() {
        assert!(has_main_guard("def main():\n    pass\n\nif __name__ == \"__main__\":\n    main()\n"));
        assert!(has_main_guard("if __name__ == '__main__':\n    run()\n"));
        assert!(!has_main_guard("import os\n\ndef helper():\n    return 1\n"));
    }

    #[test]
    fn test_directory_discovery_skips_libraries_and_venvs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("tool.py"), "if __name__ == '__main__':\n    pass\n").unwrap();
        fs::write(root.join("lib.py"), "def f():\n    pass\n").unwrap();
        fs::create_dir_all(root.join("venv")).unwrap();
        fs::write(root.join("venv/run.py"), "if __name__ == '__main__':\n    pass\n").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/cli.py"), "if __name__ == \"__main__\":\n    pass\n").unwrap();

        let found = runnable_scripts(root);
        assert_eq!(found, vec![root.join("sub/cli.py"), root.join("tool.py")]);
    }

    #[test]
    fn test_files_from_and_dedup() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("targets.txt");
        fs::write(&list, "# entry points\na.py\n\nb.py\na.py\n").unwrap();

        let args = BatchArgs {
            scripts: vec![dir.path().join("b.py")],
            files_from: Some(list),
            ..Default::default()
        };
        let found = discover(&args, &[]).unwrap();
        assert_eq!(found, vec![dir.path().join("b.py"), dir.path().join("a.py")]);
    }

    #[test]
    fn test_configured_targets_used_as_fallback() {
        let configured = vec![PathBuf::from("/proj/app.py")];
        let found = discover(&BatchArgs::default(), &configured).unwrap();
        assert_eq!(found, configured);
    }
}
