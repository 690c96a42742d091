//! Periodic reclamation of abandoned workspaces.

use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};

use crate::services::worktree::WorktreeManager;

/// Spawn the sweep loop.
///
/// Flipping `shutdown` to true stops the loop; a failed sweep is logged and
/// the loop keeps ticking; one bad cycle must not stop future sweeps.
pub fn spawn(
    worktrees: WorktreeManager,
    interval: Duration,
    retention_hours: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already purged.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("starting workspace sweep");
                    let worktrees = worktrees.clone();
                    match tokio::task::spawn_blocking(move || worktrees.sweep_stale(retention_hours)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!("workspace sweep failed: {e}"),
                        Err(e) => tracing::error!("workspace sweep task failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("janitor shutting down");
                        break;
                    }
                }
            }
        }
    })
}
