// Worker and scheduler constants (no magic values)
use std::time::Duration;

/// Sleep duration when no jobs are available (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Retention sweep cadence (1 minute)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period for active jobs during shutdown (30s)
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Active jobs older than this are considered orphaned (15 minutes)
pub const DEFAULT_STALE_ACTIVE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Poll interval while waiting for active jobs to drain
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-queue transition event buffer; slower subscribers lag
pub const DEFAULT_EVENT_BUFFER: usize = 256;
