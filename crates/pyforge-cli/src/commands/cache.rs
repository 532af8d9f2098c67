//! Cache command - list or clear cached builds

use super::{open_cache, Context};
use anyhow::{Context as _, Result};

/// List cached builds, oldest first
pub fn list(ctx: &Context) -> Result<u8> {
    let cache = open_cache(&ctx.config);
    let entries = cache.entries();

    if ctx.json {
        let json = serde_json::json!({
            "dir": cache.dir(),
            "entries": entries,
            "history": cache.history(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialize cache")?
        );
        return Ok(0);
    }

    match cache.dir() {
        Some(dir) => println!("Cache: {}", dir.display()),
        None => println!("Cache: disabled"),
    }
    if entries.is_empty() {
        println!("No cached builds");
    }
    for entry in &entries {
        println!(
            "  {}  {:<10} {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.backend.to_string(),
            &entry.fingerprint[..entry.fingerprint.len().min(12)],
            entry.artifact.display()
        );
    }
    for (backend, history) in cache.history() {
        println!(
            "  {} history: {} succeeded, {} failed",
            backend, history.successes, history.failures
        );
    }
    Ok(0)
}

/// Remove every cached build
pub fn clear(ctx: &Context) -> Result<u8> {
    let cache = open_cache(&ctx.config);
    let removed = cache.clear().context("Failed to clear cache")?;
    if ctx.json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if !ctx.quiet {
        println!("Removed {} cached build(s)", removed);
    }
    Ok(0)
}
