//! Backends command - what is installed and what each backend can do

use super::{environment, Context};
use anyhow::{Context as _, Result};
use pyforge_build::BackendInfo;

/// Run the backends command
pub fn run(ctx: &Context) -> Result<u8> {
    let env = environment(&ctx.config);
    let rows = env.describe();

    if ctx.json {
        let json = serde_json::json!({
            "host": env.host.to_string(),
            "backends": rows,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialize backends")?
        );
        return Ok(0);
    }

    println!("Host: {}", env.host);
    println!("{}", "=".repeat(60));
    for row in &rows {
        print_row(row);
    }
    println!("{}", "=".repeat(60));
    Ok(0)
}

fn print_row(row: &BackendInfo) {
    let status = match (&row.version, row.installed) {
        (Some(version), true) => format!("installed ({})", version),
        _ => "not installed".to_string(),
    };
    println!("{} [{}]: {}", row.backend, row.tool, status);
    if let Some(exe) = &row.executable {
        println!("  Executable:   {}", exe.display());
    }
    let platforms = row
        .platforms
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    println!("  Platforms:    {}", platforms);
    println!(
        "  Single file:  {}",
        if row.supports_onefile { "yes" } else { "no" }
    );
    println!(
        "  Icon:         {}",
        if row.supports_icon { "yes" } else { "no" }
    );
    println!("  Build time:   {}", row.build_time);
    println!(
        "  Size ratio:   {:.1}-{:.1}x",
        row.compression_ratio.0, row.compression_ratio.1
    );
}
