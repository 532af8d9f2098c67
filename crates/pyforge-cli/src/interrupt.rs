//! Ctrl-C handling

use pyforge_build::CancellationToken;
use std::thread;
use tracing::warn;

/// Cancel `token` on the first Ctrl-C
///
/// The listener runs a single-threaded runtime on its own thread; running
/// backends are killed by the process runner once it sees the token.
pub fn install(token: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("pyforge-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling builds");
                    token.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot listen for Ctrl-C");
    }
}
