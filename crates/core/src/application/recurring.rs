//! Recurring producer
//!
//! Each registered cadence owns a tokio task that admits a fresh record into
//! its queue on every tick. Firings are never suppressed: if earlier records
//! are still waiting or active, a new one is admitted anyway.

use crate::application::queue::Queue;
use crate::domain::{Cadence, Job, JobPayload, QueueKind};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub type CadenceId = String;

/// Snapshot of one cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CadenceStatus {
    pub id: CadenceId,
    pub queue: QueueKind,
    pub pattern: String,
    pub interval_ms: u64,
    pub paused: bool,
    pub total_runs: u64,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct RunState {
    cadence: Cadence,
    paused: bool,
    total_runs: u64,
    last_run_at: Option<i64>,
    next_run_at: Option<i64>,
    last_error: Option<String>,
}

/// Everything a tick needs; shared between the timer task and `trigger_now`
struct Firing {
    id: CadenceId,
    queue: Arc<Queue>,
    template: JobPayload,
    state: Mutex<RunState>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Firing {
    fn state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn fire(&self) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let pattern = {
            let mut state = self.state();
            state.total_runs += 1;
            state.last_run_at = Some(now);
            state.cadence.pattern().to_string()
        };

        let result = self
            .queue
            .enqueue_recurring(self.template.clone(), &pattern)
            .await;

        let mut state = self.state();
        match &result {
            Ok(job) => {
                state.last_error = None;
                debug!(cadence_id = %self.id, job_id = %job.id, queue = %job.queue, "Recurring job admitted");
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                warn!(cadence_id = %self.id, queue = %self.queue.kind(), error = %e, "Recurring firing failed");
            }
        }
        result
    }

    async fn tick(&self) {
        let now = self.time_provider.now_millis();
        let paused = {
            let mut state = self.state();
            if !state.paused {
                state.next_run_at = Some(now + state.cadence.interval().as_millis() as i64);
            }
            state.paused
        };
        if paused {
            debug!(cadence_id = %self.id, "Cadence paused, skipping firing");
            return;
        }
        // Failure is recorded in last_error and retried next tick
        let _ = self.fire().await;
    }

    fn status(&self) -> CadenceStatus {
        let state = self.state();
        CadenceStatus {
            id: self.id.clone(),
            queue: self.queue.kind(),
            pattern: state.cadence.pattern().to_string(),
            interval_ms: state.cadence.interval().as_millis() as u64,
            paused: state.paused,
            total_runs: state.total_runs,
            last_run_at: state.last_run_at,
            next_run_at: state.next_run_at,
            last_error: state.last_error.clone(),
        }
    }
}

struct Registration {
    firing: Arc<Firing>,
    task: JoinHandle<()>,
}

/// Tick `firing` every `period`, first one period from now
fn spawn_timer(firing: Arc<Firing>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            firing.tick().await;
        }
    })
}

/// Owns every recurring cadence of the process
pub struct RecurringScheduler {
    cadences: Mutex<HashMap<CadenceId, Registration>>,
    stopped: AtomicBool,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecurringScheduler {
    pub fn new(id_provider: Arc<dyn IdProvider>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            cadences: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            id_provider,
            time_provider,
        }
    }

    fn cadences(&self) -> std::sync::MutexGuard<'_, HashMap<CadenceId, Registration>> {
        self.cadences.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn firing(&self, id: &str) -> Result<Arc<Firing>> {
        self.cadences()
            .get(id)
            .map(|r| Arc::clone(&r.firing))
            .ok_or_else(|| AppError::NotFound(format!("Cadence {} not found", id)))
    }

    /// Start admitting `template` into `queue` every `cadence` interval.
    ///
    /// The first firing happens one interval after registration.
    /// Must be called from within a tokio runtime.
    pub fn schedule_recurring(
        &self,
        queue: Arc<Queue>,
        template: JobPayload,
        cadence: Cadence,
    ) -> Result<CadenceId> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "recurring scheduler is stopped".to_string(),
            ));
        }

        let id = self.id_provider.generate_id();
        let period = cadence.interval();
        let pattern = cadence.pattern().to_string();
        let firing = Arc::new(Firing {
            id: id.clone(),
            queue,
            template,
            state: Mutex::new(RunState {
                cadence,
                paused: false,
                total_runs: 0,
                last_run_at: None,
                next_run_at: Some(self.time_provider.now_millis() + period.as_millis() as i64),
                last_error: None,
            }),
            time_provider: Arc::clone(&self.time_provider),
        });
        let task = spawn_timer(Arc::clone(&firing), period);

        let mut cadences = self.cadences();
        // stop_all may have drained the map since the check above
        if self.stopped.load(Ordering::SeqCst) {
            task.abort();
            return Err(AppError::InvalidState(
                "recurring scheduler is stopped".to_string(),
            ));
        }
        info!(
            cadence_id = %id,
            queue = %firing.queue.kind(),
            pattern = %pattern,
            interval_secs = period.as_secs(),
            "Recurring cadence scheduled"
        );
        cadences.insert(id.clone(), Registration { firing, task });
        Ok(id)
    }

    /// Swap the cadence of an existing registration and restart its timer.
    ///
    /// Run statistics and the paused flag carry over; the next firing is one
    /// new interval from now.
    pub fn reschedule(&self, id: &str, cadence: Cadence) -> Result<CadenceStatus> {
        let mut cadences = self.cadences();
        let registration = cadences
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Cadence {} not found", id)))?;
        registration.task.abort();

        let period = cadence.interval();
        {
            let mut state = registration.firing.state();
            info!(
                cadence_id = %id,
                from = state.cadence.pattern(),
                to = cadence.pattern(),
                interval_secs = period.as_secs(),
                "Recurring cadence rescheduled"
            );
            state.cadence = cadence;
            if !state.paused {
                state.next_run_at =
                    Some(self.time_provider.now_millis() + period.as_millis() as i64);
            }
        }
        registration.task = spawn_timer(Arc::clone(&registration.firing), period);
        Ok(registration.firing.status())
    }

    /// Stop future firings; records already admitted are untouched
    pub fn unschedule(&self, id: &str) -> Result<()> {
        let registration = self
            .cadences()
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("Cadence {} not found", id)))?;
        registration.task.abort();
        info!(cadence_id = %id, "Recurring cadence unscheduled");
        Ok(())
    }

    /// Keep the timer but skip firings
    pub fn pause(&self, id: &str) -> Result<()> {
        let firing = self.firing(id)?;
        let mut state = firing.state();
        state.paused = true;
        state.next_run_at = None;
        info!(cadence_id = %id, "Recurring cadence paused");
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        let firing = self.firing(id)?;
        let mut state = firing.state();
        state.paused = false;
        let interval_ms = state.cadence.interval().as_millis() as i64;
        state.next_run_at = Some(self.time_provider.now_millis() + interval_ms);
        info!(cadence_id = %id, "Recurring cadence resumed");
        Ok(())
    }

    /// Admit one record now, outside the cadence (works while paused)
    pub async fn trigger_now(&self, id: &str) -> Result<Job> {
        let firing = self.firing(id)?;
        firing.fire().await
    }

    pub fn status(&self, id: &str) -> Result<CadenceStatus> {
        Ok(self.firing(id)?.status())
    }

    /// All cadences ordered by id
    pub fn list(&self) -> Vec<CadenceStatus> {
        let mut all: Vec<_> = self.cadences().values().map(|r| r.firing.status()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Abort every timer and refuse new registrations
    pub fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.cadences().drain().collect();
        for (_, registration) in &drained {
            registration.task.abort();
        }
        if !drained.is_empty() {
            info!(stopped = drained.len(), "Recurring cadences stopped");
        }
    }
}

impl Drop for RecurringScheduler {
    fn drop(&mut self) {
        for registration in self.cadences().values() {
            registration.task.abort();
        }
    }
}
