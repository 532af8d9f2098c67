//! Analyze command - the profile and imports the scorer sees

use super::{environment, Context};
use anyhow::{bail, Context as _, Result};
use pyforge_build::{DependencyAnalyzer, ImportScanner, Profiler};
use std::path::Path;
use std::sync::Arc;

/// Run the analyze command
pub fn run(ctx: &Context, script: &Path) -> Result<u8> {
    if !script.is_file() {
        bail!("{} is not a file", script.display());
    }

    let env = environment(&ctx.config);
    let scanner = Arc::new(ImportScanner::new());
    let profile = Profiler::new(env.host.clone())
        .with_analyzer(scanner.clone())
        .profile(script, false);
    let imports = scanner.analyze(script).unwrap_or_default();

    if ctx.json {
        let json = serde_json::json!({
            "profile": profile,
            "imports": imports,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialize analysis")?
        );
        return Ok(0);
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Entry point:       {}", profile.entry_point.display());
    println!("Target:            {}", profile.target);
    println!("Import closure:    {}", profile.import_closure);
    println!("Source size:       {} bytes", profile.source_bytes);
    println!("GUI framework:     {}", yes_no(profile.has_gui_framework));
    println!("Native extensions: {}", yes_no(profile.has_native_extensions));
    println!("Small CLI:         {}", yes_no(profile.is_small_cli()));
    if profile.degraded {
        println!("(analysis unavailable, minimal profile)");
    }
    let list = |set: &std::collections::BTreeSet<String>| {
        if set.is_empty() {
            "-".to_string()
        } else {
            set.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };
    println!("Imports:           {}", list(&imports.imports));
    println!("Hidden imports:    {}", list(&imports.hidden_imports));
    println!("Suggested excludes: {}", list(&imports.suggested_excludes));
    Ok(0)
}
