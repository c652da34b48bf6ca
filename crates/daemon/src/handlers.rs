// Job handlers wired into the worker pool
//
// Ranking, topic extraction and cache population live in the dashboard's
// services; the daemon only checks that a payload carries what those
// services need and hands it over.

use async_trait::async_trait;
use newsdesk_core::domain::{Job, QueueKind};
use newsdesk_core::port::{HandlerError, JobHandler};
use serde_json::Value;
use tracing::info;

/// Validates payloads per queue before dispatch
pub struct DispatchHandler;

impl DispatchHandler {
    fn required_field(queue: QueueKind) -> Option<&'static str> {
        match queue {
            QueueKind::Recommendations => Some("user_id"),
            QueueKind::TopicExtraction => Some("article_id"),
            QueueKind::CacheWarming => None,
        }
    }

    fn validate(job: &Job) -> Result<(), HandlerError> {
        let payload = job.payload.as_value();
        if !payload.is_object() {
            return Err(HandlerError::InvalidPayload(format!(
                "{} payload must be an object",
                job.queue
            )));
        }
        if let Some(field) = Self::required_field(job.queue) {
            if payload.get(field).map_or(true, Value::is_null) {
                return Err(HandlerError::InvalidPayload(format!(
                    "{} payload is missing {}",
                    job.queue, field
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for DispatchHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        Self::validate(job)?;
        info!(
            job_id = %job.id,
            queue = %job.queue,
            attempt = job.attempts_made,
            scheduled = job.schedule_pattern.is_some(),
            "Dispatching job"
        );
        Ok(())
    }
}
