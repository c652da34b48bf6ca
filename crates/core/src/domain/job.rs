// Job Record Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::queue::{QueueConfig, QueueKind};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (lower number = served first within a queue)
pub type Priority = i32;

/// Priority bands used by producers
pub mod priority {
    use super::Priority;

    pub const HIGH: Priority = 1;
    pub const MEDIUM: Priority = 2;
    pub const LOW: Priority = 3;
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "WAITING"),
            JobStatus::Active => write!(f, "ACTIVE"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(JobStatus::Waiting),
            "ACTIVE" => Ok(JobStatus::Active),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Delay rule applied before a failed job becomes eligible again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    None,
    /// delay = base_ms * 2^(attempts_made - 1)
    Exponential { base_ms: i64 },
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts were already made
    pub fn delay_ms(&self, attempts_made: u32) -> i64 {
        match self {
            Backoff::None => 0,
            Backoff::Exponential { base_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(62);
                base_ms.saturating_mul(1i64 << exponent)
            }
        }
    }

    pub fn base_ms(&self) -> Option<i64> {
        match self {
            Backoff::None => None,
            Backoff::Exponential { base_ms } => Some(*base_ms),
        }
    }

    pub fn from_base_ms(base_ms: Option<i64>) -> Self {
        match base_ms {
            Some(base_ms) => Backoff::Exponential { base_ms },
            None => Backoff::None,
        }
    }
}

/// Job Payload (opaque JSON agreed between producer and worker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Result reported by a worker for an active job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure(String),
}

/// Job Record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueKind,
    pub payload: JobPayload,
    pub priority: Priority,
    pub status: JobStatus,

    // Retry
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,

    // Timestamps (epoch ms)
    pub created_at: i64,
    pub available_at: i64, // not dequeue-able before this instant
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub last_error: Option<String>,
    /// Set when the record was produced by a recurring cadence
    pub schedule_pattern: Option<String>,
}

impl Job {
    /// Create a waiting job using the queue's retry policy and default priority
    ///
    /// ID and timestamp are injected (never generated here).
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        config: &QueueConfig,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            queue: config.kind,
            payload,
            priority: config.default_priority,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: config.retry.max_attempts,
            backoff: config.retry.backoff,
            created_at,
            available_at: created_at,
            started_at: None,
            finished_at: None,
            last_error: None,
            schedule_pattern: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// IDs are `test-1`, `test-2`, ...; timestamps start at 1000 and step by 1000.
    /// Production code injects ID and time via providers.
    pub fn new_test(kind: QueueKind, payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, &QueueConfig::for_kind(kind), payload)
    }

    /// Waiting and past its backoff delay
    pub fn is_ready(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Waiting && self.available_at <= now_millis
    }

    fn transition_error(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Claim: Waiting -> Active, counts one execution attempt
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Waiting {
            return Err(self.transition_error(JobStatus::Active));
        }
        if self.attempts_made >= self.max_attempts {
            return Err(DomainError::AttemptsExhausted {
                attempts_made: self.attempts_made,
                max_attempts: self.max_attempts,
            });
        }
        self.status = JobStatus::Active;
        self.started_at = Some(now_millis);
        self.attempts_made += 1;
        Ok(())
    }

    /// Active -> Completed
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Active {
            return Err(self.transition_error(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Active -> Waiting, not eligible before `available_at`
    pub fn retry(&mut self, available_at: i64, error: impl Into<String>) -> Result<()> {
        if self.status != JobStatus::Active {
            return Err(self.transition_error(JobStatus::Waiting));
        }
        if self.attempts_made >= self.max_attempts {
            return Err(DomainError::AttemptsExhausted {
                attempts_made: self.attempts_made,
                max_attempts: self.max_attempts,
            });
        }
        self.status = JobStatus::Waiting;
        self.available_at = available_at;
        self.started_at = None;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Active -> Failed
    pub fn fail(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        if self.status != JobStatus::Active {
            return Err(self.transition_error(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.finished_at = Some(now_millis);
        self.last_error = Some(error.into());
        Ok(())
    }
}
