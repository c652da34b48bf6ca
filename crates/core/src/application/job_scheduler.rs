//! JobScheduler - the process-wide context
//!
//! Built once at startup and shared by reference. Owns the queues, the
//! monitor, the recurring producer and the retention sweeper, and runs the
//! ordered shutdown.

use crate::application::lifecycle::{wait_for_drain, AdmissionGate, ShutdownReport};
use crate::application::monitor::Monitor;
use crate::application::queue::Queue;
use crate::application::recovery::RecoveryService;
use crate::application::recurring::{CadenceId, RecurringScheduler};
use crate::application::retention::RetentionSweeper;
use crate::application::worker::{shutdown_channel, ShutdownSender};
use crate::config::SchedulerConfig;
use crate::domain::{Cadence, JobId, JobPayload, Priority, QueueKind};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobCounts, JobStore, TimeProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct BackgroundTasks {
    sweeper_shutdown: ShutdownSender,
    sweeper: JoinHandle<()>,
    event_logger: JoinHandle<()>,
}

pub struct JobScheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    gate: Arc<AdmissionGate>,
    monitor: Arc<Monitor>,
    recurring: RecurringScheduler,
    queues: BTreeMap<QueueKind, Arc<Queue>>,
    background: Mutex<Option<BackgroundTasks>>,
    shutdown_report: Mutex<Option<ShutdownReport>>,
}

impl JobScheduler {
    /// Build every queue, reclaim orphans left by a previous process and
    /// start the background tasks. Must be called within a tokio runtime.
    pub async fn start(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(AdmissionGate::new());
        let monitor = Arc::new(Monitor::new(Arc::clone(&store), config.event_buffer));

        let queues: BTreeMap<_, _> = QueueKind::ALL
            .iter()
            .map(|kind| {
                let queue = Queue::new(
                    config.queue_config(*kind),
                    Arc::clone(&store),
                    Arc::clone(&monitor),
                    Arc::clone(&gate),
                    Arc::clone(&id_provider),
                    Arc::clone(&time_provider),
                );
                (*kind, Arc::new(queue))
            })
            .collect();
        let all_queues: Vec<_> = queues.values().cloned().collect();

        let mut sweeper = RetentionSweeper::new(all_queues.clone(), config.sweep_interval);
        if let Some(stale_after) = config.stale_active_after {
            let recovery = RecoveryService::new(all_queues, stale_after);
            if let Err(e) = recovery.recover_orphaned_jobs().await {
                warn!(error = %e, "Startup orphan recovery incomplete, will retry on sweep");
            }
            sweeper = sweeper.with_recovery(recovery);
        }

        let event_logger = monitor.spawn_event_logger()?;
        let (sweeper_shutdown, token) = shutdown_channel();
        let sweeper = tokio::spawn(sweeper.run(token));

        info!(
            queues = queues.len(),
            sweep_interval_secs = config.sweep_interval.as_secs(),
            shutdown_grace_secs = config.shutdown_grace.as_secs(),
            "Job scheduler started"
        );

        Ok(Self {
            recurring: RecurringScheduler::new(id_provider, time_provider),
            config,
            store,
            gate,
            monitor,
            queues,
            background: Mutex::new(Some(BackgroundTasks {
                sweeper_shutdown,
                sweeper,
                event_logger,
            })),
            shutdown_report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self, kind: QueueKind) -> Arc<Queue> {
        // Every kind is built in start()
        Arc::clone(&self.queues[&kind])
    }

    pub fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.queues.values()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn recurring(&self) -> &RecurringScheduler {
        &self.recurring
    }

    /// Submit by queue name at the queue's default priority
    pub async fn submit(&self, queue_type: &str, payload: serde_json::Value) -> Result<JobId> {
        self.submit_with_priority(queue_type, payload, None).await
    }

    pub async fn submit_with_priority(
        &self,
        queue_type: &str,
        payload: serde_json::Value,
        priority: Option<Priority>,
    ) -> Result<JobId> {
        let kind: QueueKind = queue_type
            .parse()
            .map_err(|_| AppError::Validation(format!("Unknown job type: {}", queue_type)))?;
        let job = self
            .queue(kind)
            .enqueue(JobPayload::new(payload), priority)
            .await?;
        Ok(job.id)
    }

    /// Register a cadence by pattern string (e.g. `every 10 minutes`)
    pub fn schedule_recurring(
        &self,
        kind: QueueKind,
        template: serde_json::Value,
        pattern: &str,
    ) -> Result<CadenceId> {
        let cadence = Cadence::parse(pattern)?;
        self.recurring
            .schedule_recurring(self.queue(kind), JobPayload::new(template), cadence)
    }

    /// Counts for every queue, keyed by queue name
    pub async fn status(&self) -> Result<BTreeMap<String, JobCounts>> {
        self.monitor.status().await
    }

    pub fn is_shutting_down(&self) -> bool {
        !self.gate.is_accepting()
    }

    /// Ordered, idempotent shutdown
    ///
    /// 1. stop admissions and claims
    /// 2. stop recurring producers and the retention sweeper
    /// 3. wait for active jobs up to the grace period
    /// 4. close monitor subscriptions
    /// 5. release the store
    ///
    /// Later calls wait for the first one and return its report.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let mut report_slot = self.shutdown_report.lock().await;
        if let Some(report) = *report_slot {
            return Ok(report);
        }

        info!("Job scheduler shutting down");
        self.gate.close();

        self.recurring.stop_all();
        let background = self.background.lock().await.take();
        let event_logger = match background {
            Some(tasks) => {
                tasks.sweeper_shutdown.shutdown();
                if let Err(e) = tasks.sweeper.await {
                    warn!(error = %e, "Retention sweeper ended abnormally");
                }
                Some(tasks.event_logger)
            }
            None => None,
        };

        let queues: Vec<_> = self.queues.values().cloned().collect();
        let report = wait_for_drain(&queues, self.config.shutdown_grace).await;

        self.monitor.close();
        if let Some(logger) = event_logger {
            if let Err(e) = logger.await {
                warn!(error = %e, "Event logger ended abnormally");
            }
        }

        self.store.close().await;

        info!(
            drained = report.drained,
            abandoned_active = report.abandoned_active,
            "Job scheduler stopped"
        );
        *report_slot = Some(report);
        Ok(report)
    }
}
