// Scheduler configuration

use crate::application::worker::constants::{
    DEFAULT_EVENT_BUFFER, DEFAULT_SHUTDOWN_GRACE, DEFAULT_STALE_ACTIVE_AFTER,
    DEFAULT_SWEEP_INTERVAL,
};
use crate::domain::{QueueConfig, QueueKind};
use crate::error::{AppError, Result};
use std::time::Duration;

/// Runtime configuration for a `JobScheduler`
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Per-queue policies; missing kinds fall back to `QueueConfig::for_kind`
    pub queues: Vec<QueueConfig>,

    /// How often the retention sweep runs
    pub sweep_interval: Duration,

    /// How long shutdown waits for active jobs
    pub shutdown_grace: Duration,

    /// Visibility timeout for active jobs (None disables reclamation)
    pub stale_active_after: Option<Duration>,

    /// Per-queue transition event buffer
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queues: QueueKind::ALL.iter().map(|k| QueueConfig::for_kind(*k)).collect(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stale_active_after: Some(DEFAULT_STALE_ACTIVE_AFTER),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SchedulerConfig {
    /// Replace the configuration of one queue
    pub fn with_queue(mut self, config: QueueConfig) -> Self {
        self.queues.retain(|q| q.kind != config.kind);
        self.queues.push(config);
        self
    }

    pub fn queue_config(&self, kind: QueueKind) -> QueueConfig {
        self.queues
            .iter()
            .find(|q| q.kind == kind)
            .cloned()
            .unwrap_or_else(|| QueueConfig::for_kind(kind))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(AppError::Config("sweep_interval must be positive".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(AppError::Config("event_buffer must be positive".to_string()));
        }
        if matches!(self.stale_active_after, Some(d) if d.is_zero()) {
            return Err(AppError::Config(
                "stale_active_after must be positive (use None to disable)".to_string(),
            ));
        }
        for queue in &self.queues {
            if queue.retry.max_attempts == 0 {
                return Err(AppError::Config(format!(
                    "queue {}: max_attempts must be at least 1",
                    queue.kind
                )));
            }
            if let Some(base_ms) = queue.retry.backoff.base_ms() {
                if base_ms < 0 {
                    return Err(AppError::Config(format!(
                        "queue {}: negative backoff base",
                        queue.kind
                    )));
                }
            }
        }
        Ok(())
    }
}
