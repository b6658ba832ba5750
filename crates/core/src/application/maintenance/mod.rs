// Maintenance Service
// Periodic stale-queue cleanup and result retention

use crate::application::queue_manager::QueueManager;
use crate::application::worker::constants::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_CLEANUP_MAX_AGE_SECS, DEFAULT_RESULT_RETENTION_DAYS,
};
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{ResultRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often maintenance runs
    pub interval: Duration,
    /// Waiting entries admitted longer ago than this are removed
    pub max_queue_age_secs: u64,
    /// Persisted results older than this are pruned (0 keeps everything)
    pub result_retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            max_queue_age_secs: DEFAULT_CLEANUP_MAX_AGE_SECS,
            result_retention_days: DEFAULT_RESULT_RETENTION_DAYS,
        }
    }
}

/// Statistics from one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub stale_entries_removed: u64,
    pub results_pruned: u64,
}

/// Maintenance scheduler
///
/// Runs `cleanup` and result pruning in the background. One failing step
/// does not skip the other.
pub struct MaintenanceScheduler {
    queue: Arc<QueueManager>,
    results: Arc<dyn ResultRepository>,
    time_provider: Arc<dyn TimeProvider>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        queue: Arc<QueueManager>,
        results: Arc<dyn ResultRepository>,
        time_provider: Arc<dyn TimeProvider>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            queue,
            results,
            time_provider,
            config,
        }
    }

    /// Run maintenance loop until shutdown
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_queue_age_secs = self.config.max_queue_age_secs,
            retention_days = self.config.result_retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes at once; skip it so startup is not a maintenance pass
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = shutdown.wait() => break,
            }

            match self.run_once().await {
                Ok(stats) => info!(
                    stale_entries_removed = stats.stale_entries_removed,
                    results_pruned = stats.results_pruned,
                    "Scheduled maintenance completed"
                ),
                Err(e) => error!(error = %e, "Scheduled maintenance failed"),
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Run one maintenance pass immediately
    pub async fn run_once(&self) -> Result<MaintenanceStats> {
        let cleanup = self.queue.cleanup(self.config.max_queue_age_secs).await;
        let pruned = self.prune_results().await;

        if let Err(e) = &pruned {
            error!(error = %e, "Result pruning failed");
        }
        Ok(MaintenanceStats {
            stale_entries_removed: cleanup?,
            results_pruned: pruned?,
        })
    }

    async fn prune_results(&self) -> Result<u64> {
        if self.config.result_retention_days == 0 {
            return Ok(0);
        }
        let cutoff = self.time_provider.now_millis()
            - i64::from(self.config.result_retention_days) * MILLIS_PER_DAY;
        self.results.prune_before(cutoff).await
    }
}
