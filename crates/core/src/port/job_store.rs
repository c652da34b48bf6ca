// Job Store Port (Interface)
//
// The store is the single source of truth for queue state. Every status
// change is a conditional write so that concurrent workers, sweepers and
// reclaimers never clobber one another.

use crate::domain::{Job, JobId, JobStatus, QueueKind};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-queue snapshot of record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// `last_error` of a record requeued by the visibility timeout
pub const RECLAIMED_ERROR: &str = "reclaimed after visibility timeout";
/// `last_error` of a record failed by the visibility timeout
pub const ABANDONED_ERROR: &str = "abandoned while active";

/// A record moved out of ACTIVE by the visibility timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedJob {
    pub id: JobId,
    /// WAITING when attempts are left, FAILED otherwise
    pub status: JobStatus,
    pub attempts_made: u32,
    pub error: String,
}

/// Outcome of returning stale active records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleRelease {
    /// Put back to waiting (attempts left)
    pub requeued: u64,
    /// Moved to failed (attempts exhausted)
    pub failed: u64,
}

impl StaleRelease {
    pub fn tally(released: &[ReleasedJob]) -> Self {
        released.iter().fold(Self::default(), |mut acc, job| {
            match job.status {
                JobStatus::Failed => acc.failed += 1,
                _ => acc.requeued += 1,
            }
            acc
        })
    }
}

/// Durable record persistence with atomic claim
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new waiting job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Claim next ready job: lowest priority value, then earliest admitted.
    ///
    /// Atomically sets ACTIVE, `started_at = now` and increments `attempts_made`.
    async fn claim_next(&self, queue: QueueKind, now_millis: i64) -> Result<Option<Job>>;

    // The `attempt` argument of the `mark_*` transitions is the `attempts_made`
    // value returned by the claim. A report from an earlier claim of the same
    // record (reclaimed and handed out again) matches nothing.

    /// ACTIVE -> COMPLETED. Returns false unless the job is active under `attempt`.
    async fn mark_completed(&self, id: &JobId, attempt: u32, finished_at: i64) -> Result<bool>;

    /// ACTIVE -> WAITING until `available_at`. Returns false unless the job is active under `attempt`.
    async fn mark_retrying(
        &self,
        id: &JobId,
        attempt: u32,
        available_at: i64,
        error: &str,
    ) -> Result<bool>;

    /// ACTIVE -> FAILED. Returns false unless the job is active under `attempt`.
    async fn mark_failed(
        &self,
        id: &JobId,
        attempt: u32,
        finished_at: i64,
        error: &str,
    ) -> Result<bool>;

    /// Count jobs by status
    async fn counts(&self, queue: QueueKind) -> Result<JobCounts>;

    /// Delete finished records of one terminal status.
    ///
    /// Records finished before `finished_before` go first, then everything
    /// beyond the `keep_newest` most recently finished. Returns deleted count.
    async fn purge_finished(
        &self,
        queue: QueueKind,
        status: JobStatus,
        keep_newest: Option<usize>,
        finished_before: Option<i64>,
    ) -> Result<u64>;

    /// Return ACTIVE records claimed before `started_before` to WAITING,
    /// or to FAILED when no attempts are left. Returns the moved records.
    async fn release_stale_active(
        &self,
        queue: QueueKind,
        started_before: i64,
        now_millis: i64,
    ) -> Result<Vec<ReleasedJob>>;

    /// Release underlying connections
    async fn close(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        jobs: HashMap<JobId, (u64, Job)>,
        next_seq: u64,
    }

    /// In-memory store (single process, Mutex-serialized)
    #[derive(Default)]
    pub struct InMemoryJobStore {
        state: Mutex<State>,
        unavailable: AtomicBool,
        closed: AtomicBool,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate a connectivity outage
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// All jobs of a queue in admission order
        pub fn jobs(&self, queue: QueueKind) -> Vec<Job> {
            let state = self.state.lock().unwrap();
            let mut jobs: Vec<_> = state
                .jobs
                .values()
                .filter(|(_, job)| job.queue == queue)
                .cloned()
                .collect();
            jobs.sort_by_key(|(seq, _)| *seq);
            jobs.into_iter().map(|(_, job)| job).collect()
        }

        fn check(&self) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AppError::Unavailable("store closed".to_string()));
            }
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Unavailable("store unreachable".to_string()));
            }
            Ok(())
        }

        fn transition<F>(&self, id: &JobId, attempt: u32, apply: F) -> Result<bool>
        where
            F: FnOnce(&mut Job) -> crate::domain::error::Result<()>,
        {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            match state.jobs.get_mut(id) {
                Some((_, job))
                    if job.status == JobStatus::Active && job.attempts_made == attempt =>
                {
                    Ok(apply(job).is_ok())
                }
                _ => Ok(false),
            }
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.jobs.contains_key(&job.id) {
                return Err(AppError::Database(format!("duplicate job id {}", job.id)));
            }
            state.next_seq += 1;
            let seq = state.next_seq;
            state.jobs.insert(job.id.clone(), (seq, job.clone()));
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            self.check()?;
            let state = self.state.lock().unwrap();
            Ok(state.jobs.get(id).map(|(_, job)| job.clone()))
        }

        async fn claim_next(&self, queue: QueueKind, now_millis: i64) -> Result<Option<Job>> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            let next = state
                .jobs
                .values()
                .filter(|(_, job)| job.queue == queue && job.is_ready(now_millis))
                .min_by_key(|(seq, job)| (job.priority, job.created_at, *seq))
                .map(|(_, job)| job.id.clone());

            let Some(id) = next else {
                return Ok(None);
            };
            let (_, job) = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::Internal(format!("job {} vanished", id)))?;
            job.start(now_millis)?;
            Ok(Some(job.clone()))
        }

        async fn mark_completed(&self, id: &JobId, attempt: u32, finished_at: i64) -> Result<bool> {
            self.transition(id, attempt, |job| job.complete(finished_at))
        }

        async fn mark_retrying(
            &self,
            id: &JobId,
            attempt: u32,
            available_at: i64,
            error: &str,
        ) -> Result<bool> {
            self.transition(id, attempt, |job| job.retry(available_at, error))
        }

        async fn mark_failed(
            &self,
            id: &JobId,
            attempt: u32,
            finished_at: i64,
            error: &str,
        ) -> Result<bool> {
            self.transition(id, attempt, |job| job.fail(finished_at, error))
        }

        async fn counts(&self, queue: QueueKind) -> Result<JobCounts> {
            self.check()?;
            let state = self.state.lock().unwrap();
            let mut counts = JobCounts::default();
            for (_, job) in state.jobs.values().filter(|(_, job)| job.queue == queue) {
                match job.status {
                    JobStatus::Waiting => counts.waiting += 1,
                    JobStatus::Active => counts.active += 1,
                    JobStatus::Completed => counts.completed += 1,
                    JobStatus::Failed => counts.failed += 1,
                }
            }
            Ok(counts)
        }

        async fn purge_finished(
            &self,
            queue: QueueKind,
            status: JobStatus,
            keep_newest: Option<usize>,
            finished_before: Option<i64>,
        ) -> Result<u64> {
            if !status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "refusing to purge {} jobs",
                    status
                )));
            }
            self.check()?;
            let mut state = self.state.lock().unwrap();

            let mut finished: Vec<(u64, i64, JobId)> = state
                .jobs
                .values()
                .filter(|(_, job)| job.queue == queue && job.status == status)
                .map(|(seq, job)| (*seq, job.finished_at.unwrap_or(0), job.id.clone()))
                .collect();
            // newest first
            finished.sort_by(|a, b| (b.1, b.0).cmp(&(a.1, a.0)));

            let mut doomed = Vec::new();
            let mut kept = Vec::new();
            for entry in finished {
                match finished_before {
                    Some(cutoff) if entry.1 < cutoff => doomed.push(entry.2),
                    _ => kept.push(entry.2),
                }
            }
            if let Some(keep) = keep_newest {
                doomed.extend(kept.into_iter().skip(keep));
            }

            for id in &doomed {
                state.jobs.remove(id);
            }
            Ok(doomed.len() as u64)
        }

        async fn release_stale_active(
            &self,
            queue: QueueKind,
            started_before: i64,
            now_millis: i64,
        ) -> Result<Vec<ReleasedJob>> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            let mut released = Vec::new();

            for (_, job) in state.jobs.values_mut() {
                let stale = job.queue == queue
                    && job.status == JobStatus::Active
                    && job.started_at.map_or(true, |t| t < started_before);
                if !stale {
                    continue;
                }
                let error = if job.attempts_made < job.max_attempts {
                    job.retry(now_millis, RECLAIMED_ERROR)?;
                    RECLAIMED_ERROR
                } else {
                    job.fail(now_millis, ABANDONED_ERROR)?;
                    ABANDONED_ERROR
                };
                released.push(ReleasedJob {
                    id: job.id.clone(),
                    status: job.status,
                    attempts_made: job.attempts_made,
                    error: error.to_string(),
                });
            }
            Ok(released)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
