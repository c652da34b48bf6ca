// SQLite JobStore Implementation
//
// Every status change is a single conditional statement (`... AND status = ?`),
// so racing workers, sweepers and reclaimers are serialized by SQLite itself.

use async_trait::async_trait;
use newsdesk_core::domain::{Backoff, Job, JobId, JobPayload, JobStatus, QueueKind};
use newsdesk_core::error::{AppError, Result};
use newsdesk_core::port::job_store::{ABANDONED_ERROR, RECLAIMED_ERROR};
use newsdesk_core::port::{JobCounts, JobStore, ReleasedJob};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, info};

/// Convert sqlx::Error to AppError, separating outages from query failures
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => match code.as_ref() {
                "2067" | "1555" => AppError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                // SQLITE_BUSY outlived the busy timeout
                "5" => AppError::Unavailable(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => AppError::Unavailable(err.to_string()),
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a guarded UPDATE; false when the guard matched nothing
    async fn conditional_update<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Result<bool> {
        let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, payload, priority, status,
                attempts_made, max_attempts, backoff_base_ms,
                created_at, available_at, started_at, finished_at,
                last_error, schedule_pattern
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.queue.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.priority)
        .bind(job.status.to_string())
        .bind(i64::from(job.attempts_made))
        .bind(i64::from(job.max_attempts))
        .bind(job.backoff.base_ms())
        .bind(job.created_at)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.last_error)
        .bind(&job.schedule_pattern)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, queue: QueueKind, now_millis: i64) -> Result<Option<Job>> {
        // One statement: SQLite takes the write lock before the subquery runs,
        // and the outer status check guards against a stale pick.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'ACTIVE', started_at = ?, attempts_made = attempts_made + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND status = 'WAITING'
                  AND available_at <= ?
                  AND attempts_made < max_attempts
                ORDER BY priority ASC, created_at ASC, rowid ASC
                LIMIT 1
            )
              AND status = 'WAITING'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(queue.as_str())
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let job = row.map(JobRow::into_job).transpose()?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, queue = %queue, attempts_made = job.attempts_made, "Job claimed");
        }
        Ok(job)
    }

    async fn mark_completed(&self, id: &JobId, attempt: u32, finished_at: i64) -> Result<bool> {
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'COMPLETED', finished_at = ?
                WHERE id = ? AND status = 'ACTIVE' AND attempts_made = ?
                "#,
            )
            .bind(finished_at)
            .bind(id)
            .bind(i64::from(attempt)),
        )
        .await
    }

    async fn mark_retrying(
        &self,
        id: &JobId,
        attempt: u32,
        available_at: i64,
        error: &str,
    ) -> Result<bool> {
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'WAITING', available_at = ?, started_at = NULL, last_error = ?
                WHERE id = ? AND status = 'ACTIVE' AND attempts_made = ?
                  AND attempts_made < max_attempts
                "#,
            )
            .bind(available_at)
            .bind(error)
            .bind(id)
            .bind(i64::from(attempt)),
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: &JobId,
        attempt: u32,
        finished_at: i64,
        error: &str,
    ) -> Result<bool> {
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'FAILED', finished_at = ?, last_error = ?
                WHERE id = ? AND status = 'ACTIVE' AND attempts_made = ?
                "#,
            )
            .bind(finished_at)
            .bind(error)
            .bind(id)
            .bind(i64::from(attempt)),
        )
        .await
    }

    async fn counts(&self, queue: QueueKind) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs WHERE queue = ? GROUP BY status")
                .bind(queue.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<JobStatus>().map_err(AppError::Database)? {
                JobStatus::Waiting => counts.waiting = count,
                JobStatus::Active => counts.active = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn purge_finished(
        &self,
        queue: QueueKind,
        status: JobStatus,
        keep_newest: Option<usize>,
        finished_before: Option<i64>,
    ) -> Result<u64> {
        if !status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "refusing to purge {} jobs",
                status
            )));
        }

        let status = status.to_string();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut removed = 0;

        if let Some(cutoff) = finished_before {
            removed += sqlx::query(
                "DELETE FROM jobs WHERE queue = ? AND status = ? AND finished_at < ?",
            )
            .bind(queue.as_str())
            .bind(&status)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        }

        if let Some(keep) = keep_newest {
            removed += sqlx::query(
                r#"
                DELETE FROM jobs
                WHERE status = ? AND id IN (
                    SELECT id FROM jobs
                    WHERE queue = ? AND status = ?
                    ORDER BY finished_at DESC, rowid DESC
                    LIMIT -1 OFFSET ?
                )
                "#,
            )
            .bind(&status)
            .bind(queue.as_str())
            .bind(&status)
            .bind(i64::try_from(keep).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(removed)
    }

    async fn release_stale_active(
        &self,
        queue: QueueKind,
        started_before: i64,
        now_millis: i64,
    ) -> Result<Vec<ReleasedJob>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut rows: Vec<(String, String, i64, String)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'WAITING', available_at = ?, started_at = NULL, last_error = ?
            WHERE queue = ? AND status = 'ACTIVE'
              AND (started_at IS NULL OR started_at < ?)
              AND attempts_made < max_attempts
            RETURNING id, status, attempts_made, last_error
            "#,
        )
        .bind(now_millis)
        .bind(RECLAIMED_ERROR)
        .bind(queue.as_str())
        .bind(started_before)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let failed: Vec<(String, String, i64, String)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'FAILED', finished_at = ?, last_error = ?
            WHERE queue = ? AND status = 'ACTIVE'
              AND (started_at IS NULL OR started_at < ?)
              AND attempts_made >= max_attempts
            RETURNING id, status, attempts_made, last_error
            "#,
        )
        .bind(now_millis)
        .bind(ABANDONED_ERROR)
        .bind(queue.as_str())
        .bind(started_before)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        rows.extend(failed);
        rows.into_iter()
            .map(|(id, status, attempts_made, error)| {
                Ok(ReleasedJob {
                    id,
                    status: status.parse().map_err(AppError::Database)?,
                    attempts_made: u32::try_from(attempts_made)
                        .map_err(|e| AppError::Database(format!("attempts_made: {}", e)))?,
                    error,
                })
            })
            .collect()
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("SQLite pool closed");
        }
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    payload: String,
    priority: i32,
    status: String,
    attempts_made: i64,
    max_attempts: i64,
    backoff_base_ms: Option<i64>,
    created_at: i64,
    available_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    last_error: Option<String>,
    schedule_pattern: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let corrupt = |field: &str| {
            AppError::Database(format!("Corrupt {} in job {}", field, self.id))
        };

        let queue: QueueKind = self.queue.parse().map_err(|_| corrupt("queue"))?;
        let status: JobStatus = self.status.parse().map_err(|_| corrupt("status"))?;
        let attempts_made = u32::try_from(self.attempts_made).map_err(|_| corrupt("attempts_made"))?;
        let max_attempts = u32::try_from(self.max_attempts).map_err(|_| corrupt("max_attempts"))?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;

        Ok(Job {
            id: self.id,
            queue,
            payload: JobPayload::new(payload),
            priority: self.priority,
            status,
            attempts_made,
            max_attempts,
            backoff: Backoff::from_base_ms(self.backoff_base_ms),
            created_at: self.created_at,
            available_at: self.available_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_error: self.last_error,
            schedule_pattern: self.schedule_pattern,
        })
    }
}
