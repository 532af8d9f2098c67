//! Log output on stderr

use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `--verbose` and `--quiet` win over the configured level. Stdout stays
/// reserved for command output so `--json` can be piped.
pub fn init(verbose: bool, quiet: bool, configured: &str) {
    let directive = filter_directive(verbose, quiet, configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn filter_directive(verbose: bool, quiet: bool, configured: &str) -> String {
    if verbose {
        "debug".to_string()
    } else if quiet {
        "error".to_string()
    } else {
        configured.to_string()
    }
}
