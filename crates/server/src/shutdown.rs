//! Signal handling: one ctrl-c drains the service, a second one aborts it.

use tokio_util::sync::CancellationToken;

const TRACING_TARGET: &str = "taskforge_server::shutdown";

/// Watches for ctrl-c. The first signal cancels `shutdown`, which stops the
/// HTTP listener and the update pump so the service can drain; a repeat
/// signal while draining exits the process immediately.
pub async fn watch_signals(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!(target: TRACING_TARGET, "signal listener unavailable");
        return;
    }
    tracing::info!(target: TRACING_TARGET, "shutdown signal received, draining");
    shutdown.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!(target: TRACING_TARGET, "second signal received, exiting immediately");
        std::process::exit(1);
    }
}
