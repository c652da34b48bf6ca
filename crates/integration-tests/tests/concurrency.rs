//! Concurrent claims against one SQLite file through a multi-connection pool

mod common;

use common::{queue_of, TempDb};
use newsdesk_core::domain::{JobOutcome, JobPayload, QueueKind};
use newsdesk_core::port::time_provider::mocks::ManualClock;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_duplicates() {
    let db = TempDb::new("concurrent");
    let store = db.open().await;
    let clock = Arc::new(ManualClock::new(0));
    let queue = queue_of(QueueKind::Recommendations, store, clock);

    let total = 100;
    for i in 0..total {
        queue.enqueue(JobPayload::new(json!({"user_id": i})), None).await.unwrap();
    }

    let mut workers = JoinSet::new();
    for worker_id in 0..8 {
        let queue = queue.clone();
        workers.spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match queue.dequeue_next().await {
                    Ok(Some(job)) => claimed.push(job.id),
                    Ok(None) => break,
                    Err(e) => panic!("worker {} failed: {}", worker_id, e),
                }
            }
            claimed
        });
    }

    let mut all = Vec::new();
    while let Some(claimed) = workers.join_next().await {
        all.extend(claimed.unwrap());
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), total);
    assert_eq!(unique.len(), total, "a job was handed out twice");
    assert_eq!(queue.counts().await.unwrap().active, total as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_and_complete() {
    let db = TempDb::new("enqueue");
    let store = db.open().await;
    let clock = Arc::new(ManualClock::new(0));
    let queue = queue_of(QueueKind::TopicExtraction, store, clock);

    let mut producers = JoinSet::new();
    for p in 0..4 {
        let queue = queue.clone();
        producers.spawn(async move {
            for i in 0..25 {
                queue
                    .enqueue(JobPayload::new(json!({"article_id": p * 100 + i})), None)
                    .await
                    .unwrap();
            }
        });
    }
    while let Some(done) = producers.join_next().await {
        done.unwrap();
    }

    let mut consumers = JoinSet::new();
    for _ in 0..4 {
        let queue = queue.clone();
        consumers.spawn(async move {
            let mut completed = 0u64;
            while let Some(job) = queue.dequeue_next().await.unwrap() {
                queue.report_result(&job, JobOutcome::Success).await.unwrap();
                completed += 1;
            }
            completed
        });
    }

    let mut completed = 0;
    while let Some(count) = consumers.join_next().await {
        completed += count.unwrap();
    }

    assert_eq!(completed, 100);
    let counts = queue.counts().await.unwrap();
    assert_eq!((counts.waiting, counts.active, counts.completed), (0, 0, 100));
}
