//! PgQueries - the queue table through the shared pool
//!
//! # フロー
//! - `dequeue`: one `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`;
//!   claimed rows are moved to `picked` by the statement that returns them
//! - `log_job`: `DELETE ... RETURNING` feeding an `INSERT` into the log table,
//!   so a second call finds nothing to move
//! - `enqueue`: insert and `pg_notify` in one transaction; the notification
//!   is delivered on commit

use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::app::DEFAULT_CHANNEL;
use bobbin_core::domain::{Job, JobId, JobStatus, StorageError};
use bobbin_core::ports::Queries;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{PgError, storage};

const DEFAULT_QUEUE_TABLE: &str = "bobbin_jobs";
const DEFAULT_LOG_TABLE: &str = "bobbin_log";

/// Columns read back from the queue table.
const COLUMNS: &str = "id, priority, entrypoint, payload, status, enqueued, picked, updated";

/// Names of the queue table and the log table.
///
/// Table names are spliced into SQL text, so only plain identifiers
/// (optionally schema-qualified) are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    queue: String,
    log: String,
}

impl TableNames {
    pub fn new(queue: impl Into<String>, log: impl Into<String>) -> Result<Self, PgError> {
        let queue = queue.into();
        let log = log.into();
        for name in [&queue, &log] {
            if !is_identifier(name) {
                return Err(PgError::InvalidTableName(name.clone()));
            }
        }
        Ok(Self { queue, log })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// Queue table split into `(schema, table)` as stored in
    /// `information_schema.columns`. No schema means `current_schema()`.
    fn queue_parts(&self) -> (Option<&str>, &str) {
        match self.queue.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, &self.queue),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE_TABLE.to_string(),
            log: DEFAULT_LOG_TABLE.to_string(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_lowercase())
                && chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

/// A row of the queue table.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    priority: i32,
    entrypoint: String,
    payload: Option<Vec<u8>>,
    status: String,
    enqueued: DateTime<Utc>,
    picked: Option<DateTime<Utc>>,
    updated: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = PgError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::new(row.id),
            priority: row.priority,
            entrypoint: row.entrypoint,
            payload: row.payload,
            status: row.status.parse()?,
            enqueued_at: row.enqueued,
            picked_at: row.picked,
            status_at: row.updated,
        })
    }
}

/// Seconds handed to `make_interval(secs => ...)`.
fn interval_secs(timer: Duration) -> f64 {
    timer.as_secs_f64()
}

/// `Queries` backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgQueries {
    pool: PgPool,
    tables: TableNames,
    channel: String,
}

impl PgQueries {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: TableNames::default(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    /// Create a pool from a database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage)?;
        Ok(Self::new(pool))
    }

    pub fn with_tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    /// Channel `enqueue` notifies.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Insert a queued job and wake listening managers.
    pub async fn enqueue(
        &self,
        entrypoint: &str,
        payload: Option<&[u8]>,
        priority: i32,
    ) -> Result<JobId, StorageError> {
        self.try_enqueue(entrypoint, payload, priority)
            .await
            .map_err(storage)
    }

    async fn try_enqueue(
        &self,
        entrypoint: &str,
        payload: Option<&[u8]>,
        priority: i32,
    ) -> Result<JobId, PgError> {
        let insert = format!(
            "INSERT INTO {} (priority, entrypoint, payload, status, enqueued, updated) \
             VALUES ($1, $2, $3, 'queued', NOW(), NOW()) \
             RETURNING id",
            self.tables.queue
        );

        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(&insert)
            .bind(priority)
            .bind(entrypoint)
            .bind(payload)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(entrypoint)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(job_id = id, entrypoint, "job enqueued");
        Ok(JobId::new(id))
    }

    async fn try_dequeue(
        &self,
        batch_size: usize,
        entrypoints: &[String],
        retry_timer: Option<Duration>,
    ) -> Result<Vec<Job>, PgError> {
        let query = format!(
            "UPDATE {queue} AS q \
             SET status = 'picked', picked = NOW(), updated = NOW() \
             FROM ( \
                 SELECT id FROM {queue} \
                 WHERE entrypoint = ANY($2) \
                   AND (status = 'queued' \
                        OR ($3::float8 IS NOT NULL AND status = 'picked' \
                            AND updated < NOW() - make_interval(secs => $3))) \
                 ORDER BY priority DESC, id ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) AS next_jobs \
             WHERE q.id = next_jobs.id \
             RETURNING {returning}",
            queue = self.tables.queue,
            returning = COLUMNS
                .split(", ")
                .map(|c| format!("q.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .bind(entrypoints)
            .bind(retry_timer.map(interval_secs))
            .fetch_all(&self.pool)
            .await?;

        // UPDATE ... RETURNING does not keep the subquery order
        let mut jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn try_log_job(&self, job: &Job, status: JobStatus) -> Result<bool, PgError> {
        let query = format!(
            "WITH moved AS ( \
                 DELETE FROM {queue} WHERE id = $1 \
                 RETURNING id, priority, entrypoint, payload, enqueued, picked \
             ) \
             INSERT INTO {log} (id, priority, entrypoint, payload, status, enqueued, picked, logged) \
             SELECT id, priority, entrypoint, payload, $2, enqueued, picked, NOW() FROM moved",
            queue = self.tables.queue,
            log = self.tables.log,
        );

        let result = sqlx::query(&query)
            .bind(job.id.get())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Queries for PgQueries {
    async fn has_updated_column(&self) -> Result<bool, StorageError> {
        let (schema, table) = self.tables.queue_parts();
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS ( \
                 SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = COALESCE($2::text, current_schema()) \
                   AND table_name = $1 \
                   AND column_name = 'updated' \
             )",
        )
        .bind(table)
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }

    async fn dequeue(
        &self,
        batch_size: usize,
        entrypoints: &[String],
        retry_timer: Option<Duration>,
    ) -> Result<Vec<Job>, StorageError> {
        self.try_dequeue(batch_size, entrypoints, retry_timer)
            .await
            .map_err(storage)
    }

    async fn log_job(&self, job: &Job, status: JobStatus) -> Result<(), StorageError> {
        let moved = self.try_log_job(job, status).await.map_err(storage)?;
        if !moved {
            tracing::debug!(job_id = %job.id, %status, "job already logged");
        }
        Ok(())
    }
}
