//! Build command - one entry point, best backend, cached

use super::{exit_status, orchestrator, print_outcome, BuildFlags, Context};
use anyhow::{Context as _, Result};
use std::path::Path;

/// Run the build command
pub fn run(ctx: &Context, script: &Path, flags: &BuildFlags) -> Result<u8> {
    let request = flags.request(script, &ctx.config)?;
    let orchestrator = orchestrator(ctx);

    if !ctx.quiet && !ctx.json {
        let installed = orchestrator.environment().installed();
        if installed.is_empty() {
            eprintln!("warning: no backend found; install pyinstaller, nuitka or cx_Freeze");
        }
    }

    let outcome = orchestrator.build(&request);

    if ctx.json {
        println!(
            "{}",
            outcome.to_json().context("Failed to serialize outcome")?
        );
    } else if !ctx.quiet || !outcome.is_success() {
        print_outcome(&outcome);
    }

    Ok(exit_status(&outcome))
}
