// Retention Sweeper
// Periodic eviction of finished records, plus stale-active reclaim

use crate::application::queue::{Queue, SweepReport};
use crate::application::recovery::RecoveryService;
use crate::application::worker::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Background task running each queue's retention sweep on a fixed timer
///
/// A failing sweep is logged and retried on the next tick; it never stops
/// the loop.
pub struct RetentionSweeper {
    queues: Vec<Arc<Queue>>,
    interval: Duration,
    recovery: Option<RecoveryService>,
}

impl RetentionSweeper {
    pub fn new(queues: Vec<Arc<Queue>>, interval: Duration) -> Self {
        Self {
            queues,
            interval,
            recovery: None,
        }
    }

    /// Also reclaim stale active jobs on every tick
    pub fn with_recovery(mut self, recovery: RecoveryService) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// One pass over every queue; returns the totals that succeeded
    pub async fn sweep_once(&self) -> SweepReport {
        let mut total = SweepReport::default();

        for queue in &self.queues {
            match queue.sweep().await {
                Ok(report) => {
                    total.completed_removed += report.completed_removed;
                    total.failed_removed += report.failed_removed;
                }
                Err(e) => {
                    error!(queue = %queue.kind(), error = %e, "Retention sweep failed, retrying next tick");
                }
            }
        }

        if let Some(recovery) = &self.recovery {
            // Errors are already logged per queue
            let _ = recovery.recover_orphaned_jobs().await;
        }

        debug!(
            completed_removed = total.completed_removed,
            failed_removed = total.failed_removed,
            "Retention pass finished"
        );
        total
    }

    /// Run until shutdown (spawn with tokio::spawn)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            queues = self.queues.len(),
            "Retention sweeper started"
        );

        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Retention sweeper stopped");
    }
}
