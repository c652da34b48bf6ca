//! Shared setup for SQLite-backed tests

#![allow(dead_code)]

use newsdesk_core::application::{AdmissionGate, Monitor, Queue};
use newsdesk_core::domain::{QueueConfig, QueueKind};
use newsdesk_core::port::id_provider::UuidProvider;
use newsdesk_core::port::time_provider::mocks::ManualClock;
use newsdesk_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Database file removed on drop (with its WAL side files)
pub struct TempDb {
    pub path: PathBuf,
}

impl TempDb {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("newsdesk-{}-{}.db", name, uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    pub async fn open(&self) -> Arc<SqliteJobStore> {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(SqliteJobStore::new(pool))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// A standalone queue over a store, driven by a manual clock
pub fn queue(
    config: QueueConfig,
    store: Arc<SqliteJobStore>,
    clock: Arc<ManualClock>,
) -> Arc<Queue> {
    Arc::new(Queue::new(
        config,
        store.clone(),
        Arc::new(Monitor::new(store, 64)),
        Arc::new(AdmissionGate::new()),
        Arc::new(UuidProvider),
        clock,
    ))
}

pub fn queue_of(kind: QueueKind, store: Arc<SqliteJobStore>, clock: Arc<ManualClock>) -> Arc<Queue> {
    queue(QueueConfig::for_kind(kind), store, clock)
}
