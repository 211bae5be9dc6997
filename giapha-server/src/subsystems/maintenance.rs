//! Periodic store maintenance.
//!
//! Removes records stored in a branch other than their home branch. Runs once
//! at start-up when `cleanup_on_start` is set, then every
//! `cleanup_interval_minutes` unless the interval is zero.

use giapha_core::config::MaintenanceConfig;
use giapha_core::{GraphStore, StoreError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub misplaced_removed: usize,
    pub elapsed_ms: u64,
}

/// One cleanup pass over every live branch.
pub async fn run_cleanup_cycle(store: &GraphStore) -> Result<MaintenanceReport, StoreError> {
    let start = std::time::Instant::now();
    let misplaced_removed = store.cleanup_wrong_branch().await?;
    let report = MaintenanceReport {
        misplaced_removed,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    tracing::info!(
        "Cleanup cycle complete: {} misplaced records removed in {}ms",
        report.misplaced_removed,
        report.elapsed_ms
    );
    Ok(report)
}

/// Called from main.rs after the store has started.
pub async fn run_maintenance_loop(
    store: GraphStore,
    config: MaintenanceConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    if config.cleanup_on_start {
        if let Err(e) = run_cleanup_cycle(&store).await {
            tracing::warn!("Start-up cleanup failed (non-fatal): {}", e);
        }
    }

    if config.cleanup_interval_minutes == 0 {
        tracing::debug!("Periodic cleanup disabled");
        return;
    }

    let interval = tokio::time::Duration::from_secs(config.cleanup_interval_minutes * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::info!(
        "Maintenance loop started (interval: {}min)",
        config.cleanup_interval_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_cleanup_cycle(&store).await {
                    tracing::error!("Cleanup error: {}", e);
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Maintenance loop shutting down");
                break;
            }
        }
    }
}
