//! Event/Status Monitor
//!
//! Per-queue transition events go through bounded broadcast channels so that
//! publishing never waits on a subscriber. Counts are always read from the
//! store, never cached here.

use crate::domain::{JobId, QueueKind};
use crate::error::{AppError, Result};
use crate::port::{JobCounts, JobStore};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What happened to a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Completed,
    Retrying { delay_ms: i64 },
    Failed,
}

/// A status transition observed on a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub queue: QueueKind,
    pub job_id: JobId,
    pub transition: TransitionKind,
    pub attempts_made: u32,
    pub error: Option<String>,
    pub at: i64,
}

type Channels = HashMap<QueueKind, broadcast::Sender<TransitionEvent>>;

pub struct Monitor {
    store: Arc<dyn JobStore>,
    channels: RwLock<Option<Channels>>,
}

impl Monitor {
    pub fn new(store: Arc<dyn JobStore>, buffer: usize) -> Self {
        let channels = QueueKind::ALL
            .iter()
            .map(|kind| (*kind, broadcast::channel(buffer.max(1)).0))
            .collect();
        Self {
            store,
            channels: RwLock::new(Some(channels)),
        }
    }

    /// Best-effort fan-out; never blocks and never fails the caller
    pub fn publish(&self, event: TransitionEvent) {
        let guard = self.channels.read().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = guard.as_ref().and_then(|c| c.get(&event.queue)) {
            // Err only means nobody is listening
            let _ = sender.send(event);
        }
    }

    pub fn subscribe(&self, queue: QueueKind) -> Result<Subscription> {
        let guard = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let sender = guard
            .as_ref()
            .and_then(|c| c.get(&queue))
            .ok_or_else(|| AppError::InvalidState("monitor is closed".to_string()))?;
        Ok(Subscription {
            queue,
            rx: sender.subscribe(),
        })
    }

    pub fn subscribe_all(&self) -> Result<Vec<Subscription>> {
        QueueKind::ALL.iter().map(|k| self.subscribe(*k)).collect()
    }

    pub async fn counts(&self, queue: QueueKind) -> Result<JobCounts> {
        self.store.counts(queue).await
    }

    /// Counts for every queue, keyed by queue name
    pub async fn status(&self) -> Result<BTreeMap<String, JobCounts>> {
        let mut status = BTreeMap::new();
        for kind in QueueKind::ALL {
            status.insert(kind.as_str().to_string(), self.store.counts(kind).await?);
        }
        Ok(status)
    }

    /// Drop all senders; every subscription ends after draining its buffer
    pub fn close(&self) {
        let mut guard = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            info!("Monitor subscriptions closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Log every transition on every queue until the monitor closes
    pub fn spawn_event_logger(&self) -> Result<JoinHandle<()>> {
        let streams = self
            .subscribe_all()?
            .into_iter()
            .map(|sub| sub.into_stream().boxed());
        let mut events = stream::select_all(streams);

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match &event.transition {
                    TransitionKind::Completed => info!(
                        queue = %event.queue,
                        job_id = %event.job_id,
                        attempts_made = event.attempts_made,
                        "Job completed"
                    ),
                    TransitionKind::Retrying { delay_ms } => warn!(
                        queue = %event.queue,
                        job_id = %event.job_id,
                        attempts_made = event.attempts_made,
                        delay_ms = *delay_ms,
                        error = event.error.as_deref().unwrap_or_default(),
                        "Job failed, retry scheduled"
                    ),
                    TransitionKind::Failed => error!(
                        queue = %event.queue,
                        job_id = %event.job_id,
                        attempts_made = event.attempts_made,
                        error = event.error.as_deref().unwrap_or_default(),
                        "Job failed permanently"
                    ),
                }
            }
            info!("Event logger stopped");
        }))
    }
}

/// Handle on one queue's transition events
pub struct Subscription {
    queue: QueueKind,
    rx: broadcast::Receiver<TransitionEvent>,
}

impl Subscription {
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Next event; None once the monitor is closed and the buffer drained
    pub async fn recv(&mut self) -> Option<TransitionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(queue = %self.queue, missed = missed, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll
    pub fn try_recv(&mut self) -> Option<TransitionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(queue = %self.queue, missed = missed, "Subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = TransitionEvent> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::job_store::mocks::InMemoryJobStore;

    fn event(queue: QueueKind, id: &str, transition: TransitionKind) -> TransitionEvent {
        TransitionEvent {
            queue,
            job_id: id.to_string(),
            transition,
            attempts_made: 1,
            error: None,
            at: 0,
        }
    }

    #[tokio::test]
    async fn test_subscription_sees_only_its_queue() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 16);
        let mut topics = monitor.subscribe(QueueKind::TopicExtraction).unwrap();

        monitor.publish(event(QueueKind::CacheWarming, "a", TransitionKind::Completed));
        monitor.publish(event(QueueKind::TopicExtraction, "b", TransitionKind::Failed));

        let received = topics.recv().await.unwrap();
        assert_eq!(received.job_id, "b");
        assert!(topics.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 1);
        for i in 0..10 {
            monitor.publish(event(
                QueueKind::Recommendations,
                &i.to_string(),
                TransitionKind::Completed,
            ));
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 2);
        let mut sub = monitor.subscribe(QueueKind::Recommendations).unwrap();

        for i in 0..5 {
            monitor.publish(event(
                QueueKind::Recommendations,
                &i.to_string(),
                TransitionKind::Completed,
            ));
        }

        assert_eq!(sub.recv().await.unwrap().job_id, "3");
        assert_eq!(sub.recv().await.unwrap().job_id, "4");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 4);
        let mut sub = monitor.subscribe(QueueKind::CacheWarming).unwrap();
        monitor.publish(event(QueueKind::CacheWarming, "last", TransitionKind::Completed));

        monitor.close();

        assert!(monitor.is_closed());
        assert_eq!(sub.recv().await.unwrap().job_id, "last");
        assert!(sub.recv().await.is_none());
        assert!(monitor.subscribe(QueueKind::CacheWarming).is_err());
    }

    #[tokio::test]
    async fn test_event_logger_stops_on_close() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 4);
        let handle = monitor.spawn_event_logger().unwrap();

        monitor.publish(event(
            QueueKind::TopicExtraction,
            "x",
            TransitionKind::Retrying { delay_ms: 1000 },
        ));
        monitor.close();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("logger should stop once the monitor closes")
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_lists_every_queue() {
        let monitor = Monitor::new(Arc::new(InMemoryJobStore::new()), 4);
        let status = monitor.status().await.unwrap();

        assert_eq!(
            status.keys().cloned().collect::<Vec<_>>(),
            vec!["cache-warming", "recommendations", "topic-extraction"]
        );
        assert!(status.values().all(|c| c.total() == 0));
    }
}
