// Orphan recovery: jobs left ACTIVE by a crashed or timed-out worker

use crate::application::queue::Queue;
use crate::error::Result;
use crate::port::job_store::StaleRelease;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Returns stale ACTIVE jobs to their queue
///
/// A job is stale once it has been ACTIVE for longer than `stale_after`.
/// Jobs with attempts left go back to WAITING (keeping `attempts_made`),
/// the rest are marked FAILED.
#[derive(Clone)]
pub struct RecoveryService {
    queues: Vec<Arc<Queue>>,
    stale_after: Duration,
}

impl RecoveryService {
    pub fn new(queues: Vec<Arc<Queue>>, stale_after: Duration) -> Self {
        Self {
            queues,
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Reclaim orphans on every queue
    ///
    /// A failing queue is logged and skipped; the first error is returned
    /// after all queues were attempted.
    pub async fn recover_orphaned_jobs(&self) -> Result<StaleRelease> {
        let mut total = StaleRelease::default();
        let mut first_error = None;

        for queue in &self.queues {
            match queue.release_stale(self.stale_after).await {
                Ok(release) => {
                    total.requeued += release.requeued;
                    total.failed += release.failed;
                }
                Err(e) => {
                    error!(queue = %queue.kind(), error = %e, "Orphan recovery failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            requeued = total.requeued,
            failed = total.failed,
            stale_after_secs = self.stale_after.as_secs(),
            "Orphaned job recovery complete"
        );
        Ok(total)
    }
}
