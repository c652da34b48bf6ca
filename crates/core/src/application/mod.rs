// Application Layer - queue services and process lifecycle

pub mod job_scheduler;
pub mod lifecycle;
pub mod monitor;
pub mod queue;
pub mod recovery;
pub mod recurring;
pub mod retention;
pub mod retry;
pub mod worker;

// Re-exports
pub use job_scheduler::JobScheduler;
pub use lifecycle::{AdmissionGate, ShutdownReport};
pub use monitor::{Monitor, Subscription, TransitionEvent, TransitionKind};
pub use queue::{Queue, SweepReport};
pub use recovery::RecoveryService;
pub use recurring::{CadenceId, CadenceStatus, RecurringScheduler};
pub use retention::RetentionSweeper;
pub use retry::{RetryDecision, RetryPlanner};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
