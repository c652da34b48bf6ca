// Worker - reference consumer loop: claim, execute, report

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::queue::Queue;
use crate::domain::{JobOutcome, JobStatus};
use crate::error::{AppError, Result};
use crate::port::JobHandler;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pulls jobs from one queue and runs them through a handler
pub struct Worker {
    queue: Arc<Queue>,
    handler: Arc<dyn JobHandler>,
}

impl Worker {
    pub fn new(queue: Arc<Queue>, handler: Arc<dyn JobHandler>) -> Self {
        Self { queue, handler }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(queue = %self.queue.kind(), "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue.kind(), error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(queue = %self.queue.kind(), "Worker stopped");
        Ok(())
    }

    /// Process next job from queue (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let job = match self.queue.dequeue_next().await? {
            Some(job) => job,
            None => return Ok(false),
        };

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            attempt = job.attempts_made,
            "Processing job"
        );

        // Panic isolation: a panicking handler must not take the worker down
        let handler = Arc::clone(&self.handler);
        let claim = job.clone();
        let job_id = job.id.clone();
        let execution = tokio::task::spawn(async move { handler.handle(&job).await }).await;

        let outcome = match execution {
            Ok(Ok(())) => JobOutcome::Success,
            Ok(Err(e)) => JobOutcome::Failure(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                error!(job_id = %job_id, "Job handler panicked");
                JobOutcome::Failure("handler panicked".to_string())
            }
            Err(join_err) => JobOutcome::Failure(format!("handler cancelled: {}", join_err)),
        };

        match self.queue.report_result(&claim, outcome).await {
            Ok(JobStatus::Completed) => debug!(job_id = %job_id, "Job completed"),
            Ok(status) => debug!(job_id = %job_id, status = %status, "Job failed"),
            // Reclaimed by the visibility timeout while running
            Err(AppError::InvalidState(reason)) => {
                warn!(job_id = %job_id, reason = %reason, "Result discarded")
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }
}
