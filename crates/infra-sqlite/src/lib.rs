// Newsdesk Infrastructure - SQLite Adapter
// Implements: JobStore

mod connection;
mod job_store;
mod migration;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;

// sqlx::Error conversion lives in job_store::map_sqlx_error: orphan rules
// forbid `From<sqlx::Error> for AppError` in this crate.
