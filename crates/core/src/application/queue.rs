// Queue - admission, claim, result reporting and retention for one lane

use crate::application::lifecycle::AdmissionGate;
use crate::application::monitor::{Monitor, TransitionEvent, TransitionKind};
use crate::application::retry::{RetryDecision, RetryPlanner};
use crate::domain::{Job, JobId, JobOutcome, JobPayload, JobStatus, Priority, QueueConfig, QueueKind};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobCounts, JobStore, StaleRelease, TimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Records removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed_removed: u64,
    pub failed_removed: u64,
}

pub struct Queue {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    monitor: Arc<Monitor>,
    gate: Arc<AdmissionGate>,
    retry: RetryPlanner,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    /// Claims handed out by this instance and not yet settled (id -> attempt)
    in_flight: Mutex<HashMap<JobId, u32>>,
}

impl Queue {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        monitor: Arc<Monitor>,
        gate: Arc<AdmissionGate>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            config,
            store,
            monitor,
            gate,
            retry: RetryPlanner::new(Arc::clone(&time_provider)),
            id_provider,
            time_provider,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn in_flight_claims(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, u32>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims handed out by this queue that have not been reported or reclaimed.
    /// Active records held by other processes are not counted.
    pub fn in_flight(&self) -> usize {
        self.in_flight_claims().len()
    }

    fn settle_claim(&self, id: &JobId, attempt: u32) {
        let mut claims = self.in_flight_claims();
        if claims.get(id) == Some(&attempt) {
            claims.remove(id);
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.config.kind
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a new waiting job (default priority when `priority` is None)
    pub async fn enqueue(&self, payload: JobPayload, priority: Option<Priority>) -> Result<Job> {
        self.admit(payload, priority, None).await
    }

    /// Admit a job produced by a recurring cadence
    pub async fn enqueue_recurring(&self, payload: JobPayload, pattern: &str) -> Result<Job> {
        self.admit(payload, None, Some(pattern)).await
    }

    async fn admit(
        &self,
        payload: JobPayload,
        priority: Option<Priority>,
        pattern: Option<&str>,
    ) -> Result<Job> {
        if !self.gate.is_accepting() {
            return Err(AppError::Admission {
                queue: self.kind().to_string(),
                reason: "scheduler is shutting down".to_string(),
            });
        }

        let mut job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            &self.config,
            payload,
        );
        if let Some(priority) = priority {
            job.priority = priority;
        }
        job.schedule_pattern = pattern.map(str::to_string);

        self.store
            .insert(&job)
            .await
            .map_err(|e| AppError::Admission {
                queue: self.kind().to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            priority = job.priority,
            "Job admitted"
        );
        Ok(job)
    }

    /// Claim the next ready job for a worker (None when empty or shutting down)
    pub async fn dequeue_next(&self) -> Result<Option<Job>> {
        if !self.gate.is_dispensing() {
            return Ok(None);
        }
        let now = self.time_provider.now_millis();
        let job = self.store.claim_next(self.kind(), now).await?;
        if let Some(job) = &job {
            self.in_flight_claims().insert(job.id.clone(), job.attempts_made);
        }
        Ok(job)
    }

    /// Record a worker's outcome for a job it claimed; returns the new status.
    ///
    /// `claim` is the record handed out by `dequeue_next`. Its `attempts_made`
    /// identifies the claim, so a result from a claim that was reclaimed by
    /// the visibility timeout (and possibly handed out again) is rejected.
    pub async fn report_result(&self, claim: &Job, outcome: JobOutcome) -> Result<JobStatus> {
        let result = self.record_result(claim, outcome).await;
        // A store error leaves the claim open; anything else decided it
        if !matches!(result, Err(AppError::Unavailable(_) | AppError::Database(_))) {
            self.settle_claim(&claim.id, claim.attempts_made);
        }
        result
    }

    async fn record_result(&self, claim: &Job, outcome: JobOutcome) -> Result<JobStatus> {
        let job_id = &claim.id;
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .filter(|job| job.queue == self.kind())
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found in {}", job_id, self.kind())))?;

        if job.status != JobStatus::Active {
            return Err(AppError::InvalidState(format!(
                "Job {} is {}, only ACTIVE jobs accept results",
                job_id, job.status
            )));
        }
        if job.attempts_made != claim.attempts_made {
            return Err(AppError::InvalidState(format!(
                "Job {} claim for attempt {} was superseded by attempt {}",
                job_id, claim.attempts_made, job.attempts_made
            )));
        }

        let attempt = claim.attempts_made;
        let now = self.time_provider.now_millis();
        let (applied, status, transition, error) = match outcome {
            JobOutcome::Success => (
                self.store.mark_completed(job_id, attempt, now).await?,
                JobStatus::Completed,
                TransitionKind::Completed,
                None,
            ),
            JobOutcome::Failure(error) => match self.retry.plan(&job) {
                RetryDecision::Retry {
                    delay_ms,
                    available_at,
                } => (
                    self.store
                        .mark_retrying(job_id, attempt, available_at, &error)
                        .await?,
                    JobStatus::Waiting,
                    TransitionKind::Retrying { delay_ms },
                    Some(error),
                ),
                RetryDecision::Exhausted => (
                    self.store.mark_failed(job_id, attempt, now, &error).await?,
                    JobStatus::Failed,
                    TransitionKind::Failed,
                    Some(error),
                ),
            },
        };

        if !applied {
            // Someone else moved the job first (reclaimer or duplicate report)
            return Err(AppError::InvalidState(format!(
                "Job {} is no longer ACTIVE under attempt {}",
                job_id, attempt
            )));
        }

        self.monitor.publish(TransitionEvent {
            queue: self.kind(),
            job_id: job_id.clone(),
            transition,
            attempts_made: job.attempts_made,
            error,
            at: now,
        });
        Ok(status)
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        self.store.counts(self.kind()).await
    }

    /// Evict finished records beyond the retention policy
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.time_provider.now_millis();
        let retention = self.config.retention;
        let retention_error = |e: AppError| AppError::Retention {
            queue: self.kind().to_string(),
            reason: e.to_string(),
        };

        let completed_removed = self
            .store
            .purge_finished(
                self.kind(),
                JobStatus::Completed,
                retention.completed.max_count,
                retention.completed.max_age_ms.map(|age| now - age),
            )
            .await
            .map_err(retention_error)?;

        let failed_removed = self
            .store
            .purge_finished(self.kind(), JobStatus::Failed, retention.failed.max_count, None)
            .await
            .map_err(retention_error)?;

        if completed_removed + failed_removed > 0 {
            info!(
                queue = %self.kind(),
                completed_removed = completed_removed,
                failed_removed = failed_removed,
                "Retention sweep evicted records"
            );
        }

        Ok(SweepReport {
            completed_removed,
            failed_removed,
        })
    }

    /// Return jobs active for longer than `stale_after` to the queue
    pub async fn release_stale(&self, stale_after: Duration) -> Result<StaleRelease> {
        let now = self.time_provider.now_millis();
        let cutoff = now - stale_after.as_millis() as i64;
        let released = self
            .store
            .release_stale_active(self.kind(), cutoff, now)
            .await?;

        for job in &released {
            self.settle_claim(&job.id, job.attempts_made);
            let transition = match job.status {
                JobStatus::Failed => TransitionKind::Failed,
                _ => TransitionKind::Retrying { delay_ms: 0 },
            };
            self.monitor.publish(TransitionEvent {
                queue: self.kind(),
                job_id: job.id.clone(),
                transition,
                attempts_made: job.attempts_made,
                error: Some(job.error.clone()),
                at: now,
            });
        }

        let release = StaleRelease::tally(&released);

        if release.requeued + release.failed > 0 {
            warn!(
                queue = %self.kind(),
                requeued = release.requeued,
                failed = release.failed,
                "Reclaimed stale active jobs"
            );
        }
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{job::priority, TerminalRetention};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::ManualClock;
    use proptest::prelude::*;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        clock: Arc<ManualClock>,
        monitor: Arc<Monitor>,
        gate: Arc<AdmissionGate>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryJobStore::new());
            Self {
                monitor: Arc::new(Monitor::new(store.clone(), 64)),
                store,
                clock: Arc::new(ManualClock::new(1_000_000)),
                gate: Arc::new(AdmissionGate::new()),
            }
        }

        fn queue(&self, config: QueueConfig) -> Queue {
            Queue::new(
                config,
                self.store.clone(),
                self.monitor.clone(),
                self.gate.clone(),
                Arc::new(SequentialIdProvider::new("job")),
                self.clock.clone(),
            )
        }

        fn queue_of(&self, kind: QueueKind) -> Queue {
            self.queue(QueueConfig::for_kind(kind))
        }
    }

    fn payload() -> JobPayload {
        JobPayload::new(json!({"article_id": 42}))
    }

    #[tokio::test]
    async fn test_enqueue_admits_waiting_job() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);

        let job = queue.enqueue(payload(), None).await.unwrap();

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.priority, priority::MEDIUM);
        assert_eq!(job.created_at, 1_000_000);
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_enqueue_surfaces_store_outage() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::TopicExtraction);
        fx.store.set_unavailable(true);

        let err = queue.enqueue(payload(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Admission { .. }));
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_admission() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);

        let low = queue.enqueue(payload(), Some(priority::LOW)).await.unwrap();
        let first_high = queue.enqueue(payload(), Some(priority::HIGH)).await.unwrap();
        let second_high = queue.enqueue(payload(), Some(priority::HIGH)).await.unwrap();

        let order: Vec<_> = [
            queue.dequeue_next().await.unwrap().unwrap(),
            queue.dequeue_next().await.unwrap().unwrap(),
            queue.dequeue_next().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|j| j.id)
        .collect();

        assert_eq!(order, vec![first_high.id, second_high.id, low.id]);
        assert!(queue.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priorities_do_not_cross_queues() {
        let fx = Fixture::new();
        let recs = fx.queue_of(QueueKind::Recommendations);
        let cache = fx.queue_of(QueueKind::CacheWarming);

        cache.enqueue(payload(), Some(priority::HIGH)).await.unwrap();
        let rec = recs.enqueue(payload(), Some(priority::LOW)).await.unwrap();

        let claimed = recs.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, rec.id);
        assert_eq!(claimed.queue, QueueKind::Recommendations);
    }

    #[tokio::test]
    async fn test_dequeue_marks_active_and_counts_attempt() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        queue.enqueue(payload(), None).await.unwrap();

        let job = queue.dequeue_next().await.unwrap().unwrap();

        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts_made, 1);
        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (0, 1));
    }

    #[tokio::test]
    async fn test_success_completes_and_stamps_finished_at() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        let mut events = fx.monitor.subscribe(QueueKind::Recommendations).unwrap();
        queue.enqueue(payload(), None).await.unwrap();
        let job = queue.dequeue_next().await.unwrap().unwrap();

        fx.clock.advance(250);
        let status = queue.report_result(&job, JobOutcome::Success).await.unwrap();

        assert_eq!(status, JobStatus::Completed);
        let stored = fx.store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.finished_at, Some(1_000_250));

        let event = events.recv().await.unwrap();
        assert_eq!(event.transition, TransitionKind::Completed);
        assert_eq!(event.job_id, job.id);
    }

    #[tokio::test]
    async fn test_topic_extraction_fails_after_two_attempts() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::TopicExtraction);
        let admitted = queue.enqueue(payload(), None).await.unwrap();

        let job = queue.dequeue_next().await.unwrap().unwrap();
        let status = queue
            .report_result(&job, JobOutcome::Failure("nlp timeout".into()))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Waiting);

        // Not eligible before the 1000ms backoff elapses
        assert!(queue.dequeue_next().await.unwrap().is_none());
        fx.clock.advance(999);
        assert!(queue.dequeue_next().await.unwrap().is_none());
        fx.clock.advance(1);

        let job = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(job.id, admitted.id);
        let status = queue
            .report_result(&job, JobOutcome::Failure("nlp timeout".into()))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Failed);
        let stored = fx.store.find_by_id(&admitted.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts_made, 2);
        assert_eq!(stored.last_error.as_deref(), Some("nlp timeout"));
    }

    #[tokio::test]
    async fn test_cache_warming_fails_immediately() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::CacheWarming);
        let mut events = fx.monitor.subscribe(QueueKind::CacheWarming).unwrap();
        queue.enqueue(payload(), None).await.unwrap();

        let job = queue.dequeue_next().await.unwrap().unwrap();
        let status = queue
            .report_result(&job, JobOutcome::Failure("redis down".into()))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Failed);
        let event = events.recv().await.unwrap();
        assert_eq!(event.transition, TransitionKind::Failed);
        assert_eq!(event.attempts_made, 1);
        assert_eq!(queue.counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_recommendation_retry_delays_double() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        let mut events = fx.monitor.subscribe(QueueKind::Recommendations).unwrap();
        queue.enqueue(payload(), None).await.unwrap();

        let mut delays = Vec::new();
        for _ in 0..2 {
            let job = queue.dequeue_next().await.unwrap().unwrap();
            queue
                .report_result(&job, JobOutcome::Failure("ranker crashed".into()))
                .await
                .unwrap();
            if let TransitionKind::Retrying { delay_ms } = events.recv().await.unwrap().transition {
                delays.push(delay_ms);
                fx.clock.advance(delay_ms);
            }
        }

        assert_eq!(delays, vec![2000, 4000]);
    }

    #[tokio::test]
    async fn test_report_rejects_non_active_job() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        let job = queue.enqueue(payload(), None).await.unwrap();

        let err = queue.report_result(&job, JobOutcome::Success).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let claimed = queue.dequeue_next().await.unwrap().unwrap();
        queue.report_result(&claimed, JobOutcome::Success).await.unwrap();
        let err = queue.report_result(&claimed, JobOutcome::Success).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_report_unknown_job() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);

        let stranger = Job::new(
            "missing".to_string(),
            0,
            queue.config(),
            payload(),
        );
        let err = queue.report_result(&stranger, JobOutcome::Success).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_completed_retention_keeps_most_recent() {
        let fx = Fixture::new();
        let queue = fx.queue(
            QueueConfig::for_kind(QueueKind::Recommendations)
                .with_completed_retention(TerminalRetention::count(2)),
        );

        let mut completed = Vec::new();
        for _ in 0..5 {
            queue.enqueue(payload(), None).await.unwrap();
            let job = queue.dequeue_next().await.unwrap().unwrap();
            fx.clock.advance(10);
            queue.report_result(&job, JobOutcome::Success).await.unwrap();
            completed.push(job.id);
        }

        let report = queue.sweep().await.unwrap();
        assert_eq!(report.completed_removed, 3);

        let survivors: Vec<_> = fx
            .store
            .jobs(QueueKind::Recommendations)
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(survivors, completed[3..].to_vec());
    }

    #[tokio::test]
    async fn test_completed_retention_by_age() {
        let fx = Fixture::new();
        let queue = fx.queue(
            QueueConfig::for_kind(QueueKind::CacheWarming)
                .with_completed_retention(TerminalRetention::count_and_age(100, 60_000)),
        );

        queue.enqueue(payload(), None).await.unwrap();
        let old = queue.dequeue_next().await.unwrap().unwrap();
        queue.report_result(&old, JobOutcome::Success).await.unwrap();

        fx.clock.advance(120_000);
        queue.enqueue(payload(), None).await.unwrap();
        let fresh = queue.dequeue_next().await.unwrap().unwrap();
        queue.report_result(&fresh, JobOutcome::Success).await.unwrap();

        queue.sweep().await.unwrap();

        assert!(fx.store.find_by_id(&old.id).await.unwrap().is_none());
        assert!(fx.store.find_by_id(&fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_never_touches_waiting_or_active() {
        let fx = Fixture::new();
        let queue = fx.queue(
            QueueConfig::for_kind(QueueKind::CacheWarming)
                .with_completed_retention(TerminalRetention::count_and_age(0, 1))
                .with_failed_retention(Some(0)),
        );

        queue.enqueue(payload(), None).await.unwrap();
        queue.enqueue(payload(), None).await.unwrap();
        queue.dequeue_next().await.unwrap().unwrap();
        fx.clock.advance(1_000_000);

        queue.sweep().await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 1));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fx = Fixture::new();
        let queue = fx.queue(
            QueueConfig::for_kind(QueueKind::CacheWarming)
                .with_completed_retention(TerminalRetention::count(1))
                .with_failed_retention(Some(1)),
        );
        for outcome in [
            JobOutcome::Success,
            JobOutcome::Success,
            JobOutcome::Failure("x".into()),
        ] {
            queue.enqueue(payload(), None).await.unwrap();
            let job = queue.dequeue_next().await.unwrap().unwrap();
            fx.clock.advance(5);
            queue.report_result(&job, outcome).await.unwrap();
        }

        let first_report = queue.sweep().await.unwrap();
        let first: Vec<_> = fx.store.jobs(QueueKind::CacheWarming).into_iter().map(|j| j.id).collect();
        let second_report = queue.sweep().await.unwrap();
        let second: Vec<_> = fx.store.jobs(QueueKind::CacheWarming).into_iter().map(|j| j.id).collect();

        assert_eq!(first_report.completed_removed, 1);
        assert_eq!(first.len(), 2);

        assert_eq!(second_report, SweepReport::default());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sweep_error_is_retention_error() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        fx.store.set_unavailable(true);

        let err = queue.sweep().await.unwrap_err();
        assert!(matches!(err, AppError::Retention { .. }));
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_enqueue_and_dequeue() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        queue.enqueue(payload(), None).await.unwrap();

        fx.gate.close();

        assert!(matches!(
            queue.enqueue(payload(), None).await,
            Err(AppError::Admission { .. })
        ));
        assert!(queue.dequeue_next().await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_release_stale_requeues_or_fails() {
        let fx = Fixture::new();
        let recs = fx.queue_of(QueueKind::Recommendations);
        let cache = fx.queue_of(QueueKind::CacheWarming);

        recs.enqueue(payload(), None).await.unwrap();
        cache.enqueue(payload(), None).await.unwrap();
        let rec = recs.dequeue_next().await.unwrap().unwrap();
        let warm = cache.dequeue_next().await.unwrap().unwrap();

        fx.clock.advance(10 * 60 * 1000);
        let stale_after = Duration::from_secs(5 * 60);

        assert_eq!(recs.release_stale(stale_after).await.unwrap().requeued, 1);
        assert_eq!(cache.release_stale(stale_after).await.unwrap().failed, 1);

        let rec = fx.store.find_by_id(&rec.id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Waiting);
        assert_eq!(rec.attempts_made, 1);
        let warm = fx.store.find_by_id(&warm.id).await.unwrap().unwrap();
        assert_eq!(warm.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_result_from_reclaimed_claim_is_rejected() {
        let fx = Fixture::new();
        let queue = fx.queue_of(QueueKind::Recommendations);
        let stale_after = Duration::from_secs(15 * 60);
        queue.enqueue(payload(), None).await.unwrap();

        let slow = queue.dequeue_next().await.unwrap().unwrap();
        fx.clock.advance(20 * 60 * 1000);
        queue.release_stale(stale_after).await.unwrap();
        let live = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(live.id, slow.id);

        let err = queue.report_result(&slow, JobOutcome::Success).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(
            fx.store.find_by_id(&live.id).await.unwrap().unwrap().status,
            JobStatus::Active
        );

        // Reclaimed again: neither earlier claim may settle the third one
        fx.clock.advance(20 * 60 * 1000);
        queue.release_stale(stale_after).await.unwrap();
        let third = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(third.attempts_made, 3);
        for stale in [&slow, &live] {
            let err = queue
                .report_result(stale, JobOutcome::Failure("late".into()))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidState(_)));
        }

        assert_eq!(
            queue.report_result(&third, JobOutcome::Success).await.unwrap(),
            JobStatus::Completed
        );
        let stored = fx.store.find_by_id(&third.id).await.unwrap().unwrap();
        assert_eq!((stored.status, stored.attempts_made), (JobStatus::Completed, 3));
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_release_stale_publishes_transitions() {
        let fx = Fixture::new();
        let recs = fx.queue_of(QueueKind::Recommendations);
        let cache = fx.queue_of(QueueKind::CacheWarming);
        let mut rec_events = fx.monitor.subscribe(QueueKind::Recommendations).unwrap();
        let mut cache_events = fx.monitor.subscribe(QueueKind::CacheWarming).unwrap();

        recs.enqueue(payload(), None).await.unwrap();
        cache.enqueue(payload(), None).await.unwrap();
        let rec = recs.dequeue_next().await.unwrap().unwrap();
        let warm = cache.dequeue_next().await.unwrap().unwrap();
        fx.clock.advance(20 * 60 * 1000);

        let stale_after = Duration::from_secs(15 * 60);
        recs.release_stale(stale_after).await.unwrap();
        cache.release_stale(stale_after).await.unwrap();

        let event = rec_events.recv().await.unwrap();
        assert_eq!(event.job_id, rec.id);
        assert_eq!(event.transition, TransitionKind::Retrying { delay_ms: 0 });
        assert_eq!(event.attempts_made, 1);

        let event = cache_events.recv().await.unwrap();
        assert_eq!(event.job_id, warm.id);
        assert_eq!(event.transition, TransitionKind::Failed);
        assert_eq!(event.error.as_deref(), Some("abandoned while active"));
        assert_eq!(event.at, 1_000_000 + 20 * 60 * 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_hands_out_each_job_once() {
        let fx = Fixture::new();
        let queue = Arc::new(fx.queue_of(QueueKind::TopicExtraction));
        let total = 200;
        for i in 0..total {
            queue.enqueue(JobPayload::new(json!({"article_id": i})), None).await.unwrap();
        }

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let queue = queue.clone();
            workers.spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = queue.dequeue_next().await.unwrap() {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            });
        }

        let mut all = Vec::new();
        while let Some(claimed) = workers.join_next().await {
            all.extend(claimed.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().cloned().collect();

        assert_eq!(all.len(), total);
        assert_eq!(unique.len(), total);
    }

    proptest! {
        #[test]
        fn prop_attempts_never_exceed_max(
            kind_index in 0usize..3,
            failures in proptest::collection::vec(any::<bool>(), 1..12),
        ) {
            let kind = QueueKind::ALL[kind_index];
            let fx = Fixture::new();
            let queue = fx.queue_of(kind);
            let max_attempts = queue.config().retry.max_attempts;

            tokio_test::block_on(async {
                let admitted = queue.enqueue(payload(), None).await.unwrap();
                for fail in failures {
                    fx.clock.advance(60_000);
                    let Some(job) = queue.dequeue_next().await.unwrap() else { break };
                    let outcome = if fail {
                        JobOutcome::Failure("injected".into())
                    } else {
                        JobOutcome::Success
                    };
                    queue.report_result(&job, outcome).await.unwrap();

                    let stored = fx.store.find_by_id(&admitted.id).await.unwrap().unwrap();
                    assert!(stored.attempts_made <= max_attempts);
                }
                let stored = fx.store.find_by_id(&admitted.id).await.unwrap().unwrap();
                assert!(stored.attempts_made <= max_attempts);
                if stored.status == JobStatus::Failed {
                    assert_eq!(stored.attempts_made, max_attempts);
                }
            });
        }
    }
}
