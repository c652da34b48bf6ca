// Queue Domain Model

use crate::domain::error::DomainError;
use crate::domain::job::{priority, Backoff, Priority};
use serde::{Deserialize, Serialize};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// The three work lanes of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    Recommendations,
    TopicExtraction,
    CacheWarming,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [
        QueueKind::Recommendations,
        QueueKind::TopicExtraction,
        QueueKind::CacheWarming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Recommendations => "recommendations",
            QueueKind::TopicExtraction => "topic-extraction",
            QueueKind::CacheWarming => "cache-warming",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recommendations" => Ok(QueueKind::Recommendations),
            "topic-extraction" => Ok(QueueKind::TopicExtraction),
            "cache-warming" => Ok(QueueKind::CacheWarming),
            other => Err(DomainError::UnknownQueue(other.to_string())),
        }
    }
}

/// Attempt limit and delay rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Bounds on finished-record history of one status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalRetention {
    /// Keep at most this many records (newest first)
    pub max_count: Option<usize>,
    /// Evict records finished longer ago than this
    pub max_age_ms: Option<i64>,
}

impl TerminalRetention {
    pub fn count(max_count: usize) -> Self {
        Self {
            max_count: Some(max_count),
            max_age_ms: None,
        }
    }

    pub fn count_and_age(max_count: usize, max_age_ms: i64) -> Self {
        Self {
            max_count: Some(max_count),
            max_age_ms: Some(max_age_ms),
        }
    }
}

/// History retention for completed and failed records
///
/// Failed records are only ever capped by count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed: TerminalRetention,
    pub failed: TerminalRetention,
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub kind: QueueKind,
    pub default_priority: Priority,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
}

impl QueueConfig {
    /// Production defaults for each lane
    pub fn for_kind(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Recommendations => Self {
                kind,
                default_priority: priority::MEDIUM,
                retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Backoff::Exponential { base_ms: 2000 },
                },
                retention: RetentionPolicy {
                    completed: TerminalRetention::count_and_age(100, 24 * HOUR_MS),
                    failed: TerminalRetention::count(50),
                },
            },
            QueueKind::TopicExtraction => Self {
                kind,
                default_priority: priority::MEDIUM,
                retry: RetryPolicy {
                    max_attempts: 2,
                    backoff: Backoff::Exponential { base_ms: 1000 },
                },
                retention: RetentionPolicy {
                    completed: TerminalRetention::count_and_age(1000, 24 * HOUR_MS),
                    failed: TerminalRetention::count(500),
                },
            },
            QueueKind::CacheWarming => Self {
                kind,
                default_priority: priority::LOW,
                retry: RetryPolicy {
                    max_attempts: 1,
                    backoff: Backoff::None,
                },
                retention: RetentionPolicy {
                    completed: TerminalRetention::count_and_age(10, HOUR_MS),
                    failed: TerminalRetention::count(10),
                },
            },
        }
    }

    pub fn with_completed_retention(mut self, retention: TerminalRetention) -> Self {
        self.retention.completed = retention;
        self
    }

    pub fn with_failed_retention(mut self, max_count: Option<usize>) -> Self {
        self.retention.failed = TerminalRetention {
            max_count,
            max_age_ms: None,
        };
        self
    }
}
