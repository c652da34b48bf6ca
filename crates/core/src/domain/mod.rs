// Domain Layer - Pure business logic and entities

pub mod cadence;
pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use cadence::Cadence;
pub use error::DomainError;
pub use job::{Backoff, Job, JobId, JobOutcome, JobPayload, JobStatus, Priority};
pub use queue::{QueueConfig, QueueKind, RetentionPolicy, RetryPolicy, TerminalRetention};
