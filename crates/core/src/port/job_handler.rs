// Job Handler Port
// Business logic executed by the worker pool (ranking, topic extraction, cache fill)

use crate::domain::Job;
use async_trait::async_trait;
use thiserror::Error;

/// Execution failures reported by a handler
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Job Handler trait
///
/// Must tolerate overlapping runs of the same logical work: recurring
/// cadences do not wait for earlier firings to finish.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then succeed
        FailTimes(usize),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock Job Handler for testing
    pub struct MockJobHandler {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl MockJobHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Job IDs in the order they were handled
        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for MockJobHandler {
        async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(job.id.clone());

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Success => Ok(()),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg)),
                MockBehavior::FailTimes(n) if call < n => {
                    Err(HandlerError::Failed(format!("injected failure {}", call + 1)))
                }
                MockBehavior::FailTimes(_) => Ok(()),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
