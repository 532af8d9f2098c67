use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use pyforge_build::{CancellationToken, FailureClass};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod interrupt;
mod logging;

use commands::{BuildFlags, Context};

/// PyForge: turn Python programs into native executables.
///
/// PyForge picks the best installed backend (PyInstaller, Nuitka or cx_Freeze)
/// for each program, falls back to the next one when a build fails, and caches
/// successful builds.
///
/// EXAMPLES:
///     pyforge build app.py                  Build with the best backend
///     pyforge build app.py --backend nuitka Force one backend
///     pyforge batch --directory tools/      Build every script in a directory
///     pyforge backends                      Show installed backends
///     pyforge analyze app.py                Show what PyForge sees in a script
///
/// ENVIRONMENT VARIABLES:
///     PYFORGE_BACKEND      Default backend (auto, pyinstaller, nuitka, cx_freeze)
///     PYFORGE_PRIORITY     balanced, speed, size or compatibility
///     PYFORGE_MAX_WORKERS  Parallel builds for batch
///     PYFORGE_TIMEOUT      Per-backend timeout in seconds
///     PYFORGE_CACHE_DIR    Build cache directory
///     PYFORGE_LOG          Log filter (trace, debug, info, warn, error)
///     PYFORGE_JSON         Set to '1' for JSON output by default
#[derive(Parser)]
#[command(name = "pyforge")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Errors only
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Machine-readable output
    #[arg(long, global = true, env = "PYFORGE_JSON")]
    json: bool,

    /// Project configuration file (default: pyforge.toml, searched upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one Python script into an executable
    ///
    /// Scores every installed backend for the script and tries them in order
    /// until one succeeds. A result already in the build cache is reused.
    ///
    /// EXAMPLES:
    ///     pyforge build app.py
    ///     pyforge build app.py --windowed --icon app.ico
    ///     pyforge build app.py --onedir --priority speed
    ///     pyforge build app.py --no-cache --json
    #[command(visible_alias = "b")]
    Build {
        /// Entry-point script
        script: PathBuf,

        #[command(flatten)]
        flags: BuildFlags,
    },

    /// Build many scripts in parallel
    ///
    /// Entry points come from the arguments, from --files-from, from
    /// --directory (every script with a `__main__` guard) or from the
    /// project's `[build] targets`.
    ///
    /// EXAMPLES:
    ///     pyforge batch a.py b.py c.py
    ///     pyforge batch --directory scripts/ --max-workers 4
    ///     pyforge batch --files-from targets.txt --stop-on-error
    Batch {
        /// Entry-point scripts
        scripts: Vec<PathBuf>,

        /// Read entry points from a file, one per line
        #[arg(long)]
        files_from: Option<PathBuf>,

        /// Build every runnable script under a directory
        #[arg(long, short = 'd')]
        directory: Option<PathBuf>,

        /// Parallel builds (default: number of CPUs)
        #[arg(long, short = 'j')]
        max_workers: Option<usize>,

        /// Cancel the remaining builds after the first failure
        #[arg(long)]
        stop_on_error: bool,

        #[command(flatten)]
        flags: BuildFlags,
    },

    /// Show backends and what they support
    Backends,

    /// Show the profile PyForge derives from a script
    Analyze {
        /// Entry-point script
        script: PathBuf,
    },

    /// Inspect or clear the build cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     pyforge completions bash > ~/.local/share/bash-completion/completions/pyforge
    ///     pyforge completions zsh > ~/.zfunc/_pyforge
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached builds
    List,
    /// Remove every cached build and the backend history
    Clear,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(FailureClass::Configuration.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(0);
    }

    let config = commands::load_config(cli.config.as_deref())?;
    logging::init(cli.verbose, cli.quiet, config.log_level());

    let cancel = CancellationToken::new();
    interrupt::install(cancel.clone());

    let ctx = Context {
        config,
        cancel,
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Build { script, flags } => commands::build::run(&ctx, &script, &flags),
        Commands::Batch {
            scripts,
            files_from,
            directory,
            max_workers,
            stop_on_error,
            flags,
        } => {
            let args = commands::batch::BatchArgs {
                scripts,
                files_from,
                directory,
                max_workers,
                stop_on_error,
            };
            commands::batch::run(&ctx, &args, &flags)
        }
        Commands::Backends => commands::backends::run(&ctx),
        Commands::Analyze { script } => commands::analyze::run(&ctx, &script),
        Commands::Cache { action } => match action {
            CacheAction::List => commands::cache::list(&ctx),
            CacheAction::Clear => commands::cache::clear(&ctx),
        },
        Commands::Completions { .. } => Ok(0),
    }
}
