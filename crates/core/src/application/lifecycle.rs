// Lifecycle: admission gate and shutdown drain

use crate::application::queue::Queue;
use crate::application::worker::constants::DRAIN_POLL_INTERVAL;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Process-wide switch consulted by every queue before admitting or handing out work
#[derive(Debug)]
pub struct AdmissionGate {
    accepting: AtomicBool,
    dispensing: AtomicBool,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            dispensing: AtomicBool::new(true),
        }
    }
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn is_dispensing(&self) -> bool {
        self.dispensing.load(Ordering::SeqCst)
    }

    /// Stop admissions and claims. Returns false if already closed.
    pub fn close(&self) -> bool {
        let was_open = self.accepting.swap(false, Ordering::SeqCst);
        self.dispensing.store(false, Ordering::SeqCst);
        was_open
    }
}

/// Result of a shutdown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every active job finished within the grace period
    pub drained: bool,
    /// Claims of this process left behind (reclaimed on restart)
    pub abandoned_active: u64,
}

/// Wait until no queue has claims of this process in flight, or the grace
/// period elapses. Active records held by other processes, or orphaned by an
/// earlier crash, are left to the visibility timeout.
pub(crate) async fn wait_for_drain(queues: &[Arc<Queue>], grace: Duration) -> ShutdownReport {
    let deadline = Instant::now() + grace;

    loop {
        let active: u64 = queues.iter().map(|queue| queue.in_flight() as u64).sum();

        if active == 0 {
            info!("All active jobs drained");
            return ShutdownReport {
                drained: true,
                abandoned_active: 0,
            };
        }

        if Instant::now() >= deadline {
            warn!(
                abandoned_active = active,
                grace_ms = grace.as_millis() as u64,
                "Shutdown timeout: active jobs abandoned, they will be reclaimed on restart"
            );
            return ShutdownReport {
                drained: false,
                abandoned_active: active,
            };
        }

        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
