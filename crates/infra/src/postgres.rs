//! Postgres-backed job store.
//!
//! Persists job records in a single `jobs` table so that lifecycle state
//! survives process restarts. Status transition and progress invariants
//! are enforced inside a transaction with a row lock, mirroring the
//! in-memory store's behavior.
//!
//! SQLx errors map to [`JobStoreError`] as follows: unique violations
//! (`23505`) become `Conflict`, everything else becomes `Storage` with
//! the failing operation named in the message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use bulkscreen_core::JobId;
use bulkscreen_engine::{Job, JobStatus, JobStore, JobStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id          UUID PRIMARY KEY,
    status          TEXT NOT NULL,
    start_timestamp TIMESTAMPTZ NOT NULL,
    end_timestamp   TIMESTAMPTZ,
    input_file_path TEXT NOT NULL,
    output_file_path TEXT,
    total_rows      BIGINT,
    processed_rows  BIGINT NOT NULL DEFAULT 0,
    error_message   TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
"#;

/// Postgres implementation of [`JobStore`].
///
/// Thread-safe: all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    ///
    /// Idempotent; called once at startup before the store is used.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn fetch_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: JobId,
    ) -> Result<Job, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                job_id,
                status,
                start_timestamp,
                end_timestamp,
                input_file_path,
                output_file_path,
                total_rows,
                processed_rows,
                error_message
            FROM jobs
            WHERE job_id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("fetch_for_update", e))?
        .ok_or(JobStoreError::NotFound(job_id))?;

        let job_row = JobRow::from_row(&row)
            .map_err(|e| JobStoreError::Storage(format!("failed to deserialize job row: {e}")))?;
        Job::try_from(job_row)
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.job_id), err)]
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id,
                status,
                start_timestamp,
                end_timestamp,
                input_file_path,
                output_file_path,
                total_rows,
                processed_rows,
                error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.job_id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.start_timestamp)
        .bind(job.end_timestamp)
        .bind(path_text(&job.input_path))
        .bind(job.output_path.as_deref().map(path_text))
        .bind(job.total_rows)
        .bind(job.processed_rows)
        .bind(&job.error_message)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::Conflict(job.job_id)
            } else {
                map_sqlx_error("create", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                job_id,
                status,
                start_timestamp,
                end_timestamp,
                input_file_path,
                output_file_path,
                total_rows,
                processed_rows,
                error_message
            FROM jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let job_row = JobRow::from_row(&row).map_err(|e| {
                    JobStoreError::Storage(format!("failed to deserialize job row: {e}"))
                })?;
                Ok(Some(Job::try_from(job_row)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                job_id,
                status,
                start_timestamp,
                end_timestamp,
                input_file_path,
                output_file_path,
                total_rows,
                processed_rows,
                error_message
            FROM jobs
            ORDER BY start_timestamp DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_all", e))?;

        collect_jobs(rows)
    }

    #[instrument(skip(self), err)]
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                job_id,
                status,
                start_timestamp,
                end_timestamp,
                input_file_path,
                output_file_path,
                total_rows,
                processed_rows,
                error_message
            FROM jobs
            WHERE status = $1
            ORDER BY start_timestamp DESC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_status", e))?;

        collect_jobs(rows)
    }

    #[instrument(skip(self), err)]
    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<String>,
        end_timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = self.fetch_for_update(&mut tx, job_id).await?;
        if !current.status.can_transition_to(status) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(JobStoreError::Storage(format!(
                "illegal status transition {} -> {} for job {}",
                current.status, status, job_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                end_timestamp = COALESCE($4, end_timestamp)
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(status.as_str())
        .bind(error_message)
        .bind(end_timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn update_progress(
        &self,
        job_id: JobId,
        processed_rows: i64,
    ) -> Result<(), JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut current = self.fetch_for_update(&mut tx, job_id).await?;
        current
            .record_progress(processed_rows)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        sqlx::query("UPDATE jobs SET processed_rows = $2 WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .bind(processed_rows)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_progress", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn update_output_path(
        &self,
        job_id: JobId,
        output_path: &Path,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE jobs SET output_file_path = $2 WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .bind(path_text(output_path))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_output_path", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn collect_jobs(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Job>, JobStoreError> {
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let job_row = JobRow::from_row(&row)
            .map_err(|e| JobStoreError::Storage(format!("failed to deserialize job row: {e}")))?;
        jobs.push(Job::try_from(job_row)?);
    }
    Ok(jobs)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct JobRow {
    job_id: uuid::Uuid,
    status: String,
    start_timestamp: DateTime<Utc>,
    end_timestamp: Option<DateTime<Utc>>,
    input_file_path: String,
    output_file_path: Option<String>,
    total_rows: Option<i64>,
    processed_rows: i64,
    error_message: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            job_id: row.try_get("job_id")?,
            status: row.try_get("status")?,
            start_timestamp: row.try_get("start_timestamp")?,
            end_timestamp: row.try_get("end_timestamp")?,
            input_file_path: row.try_get("input_file_path")?,
            output_file_path: row.try_get("output_file_path")?,
            total_rows: row.try_get("total_rows")?,
            processed_rows: row.try_get("processed_rows")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status)
            .map_err(|e| JobStoreError::Storage(format!("corrupt status column: {e}")))?;
        Ok(Job {
            job_id: JobId::from_uuid(row.job_id),
            status,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
            input_path: PathBuf::from(row.input_file_path),
            output_path: row.output_file_path.map(PathBuf::from),
            total_rows: row.total_rows,
            processed_rows: row.processed_rows,
            error_message: row.error_message,
        })
    }
}
