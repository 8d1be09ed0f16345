//! Bridges the engine's update channel into the hub and drives the
//! periodic registry reaper.

use std::sync::Arc;
use std::time::Duration;

use taskforge_engine::{TaskManager, TaskUpdate, UpdateHub};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const TRACING_TARGET: &str = "taskforge_server::pump";

/// How often terminal tasks past their TTL get reaped.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Forwards every task update into the hub and reaps expired tasks on a
/// fixed tick, until `shutdown` fires or the update channel closes.
pub async fn run(
    mut updates: mpsc::Receiver<TaskUpdate>,
    hub: UpdateHub,
    manager: Arc<TaskManager>,
    shutdown: CancellationToken,
) {
    let mut reap_tick = tokio::time::interval(REAP_INTERVAL);
    reap_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => hub.broadcast(update),
                None => break,
            },
            _ = reap_tick.tick() => {
                let removed = manager.reap();
                if removed > 0 {
                    tracing::info!(
                        target: TRACING_TARGET,
                        count = removed,
                        "cleaned up completed tasks"
                    );
                }
            }
        }
    }

    tracing::debug!(target: TRACING_TARGET, "update pump stopping");
}
