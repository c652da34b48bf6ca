// Retry planning: exponential backoff against the job's attempt budget
use crate::domain::Job;
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to waiting, eligible again at `available_at`
    Retry { delay_ms: i64, available_at: i64 },
    /// No attempts left, job has failed permanently
    Exhausted,
}

/// Decides what happens to an active job whose execution failed
///
/// `attempts_made` already counts the attempt that just failed (it is
/// incremented at claim time), so:
/// - `attempts_made < max_attempts` => retry after `base * 2^(attempts_made - 1)`
/// - otherwise => failed
pub struct RetryPlanner {
    time_provider: Arc<dyn TimeProvider>,
}

impl RetryPlanner {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }

    pub fn plan(&self, job: &Job) -> RetryDecision {
        if job.attempts_made >= job.max_attempts {
            warn!(
                job_id = %job.id,
                queue = %job.queue,
                attempts_made = job.attempts_made,
                max_attempts = job.max_attempts,
                "Max attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let delay_ms = job.backoff.delay_ms(job.attempts_made);
        let available_at = self.time_provider.now_millis().saturating_add(delay_ms);

        info!(
            job_id = %job.id,
            queue = %job.queue,
            attempts_made = job.attempts_made,
            max_attempts = job.max_attempts,
            delay_ms = delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry {
            delay_ms,
            available_at,
        }
    }
}
