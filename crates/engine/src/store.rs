//! Job persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bulkscreen_core::JobId;

use crate::job::{Job, JobStatus};

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    Conflict(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable record of job state, keyed by `job_id`.
///
/// All mutations are atomic single-row updates; each mutable field has
/// exactly one logical owner (the runner during execution, the reconciler
/// at startup), so no locking protocol beyond that is required.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Duplicate ids fail with [`JobStoreError::Conflict`].
    async fn create(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Fetch a job by id.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// All jobs, newest submission first.
    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError>;

    /// All jobs currently in `status` (used by the reconciler).
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError>;

    /// Write a status transition, optionally with a failure cause and the
    /// terminal timestamp.
    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<String>,
        end_timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), JobStoreError>;

    /// Checkpoint the processed-row counter.
    async fn update_progress(&self, job_id: JobId, processed_rows: i64)
    -> Result<(), JobStoreError>;

    /// Record the output file location after it has been fully written.
    async fn update_output_path(&self, job_id: JobId, output_path: &Path)
    -> Result<(), JobStoreError>;
}

/// In-memory job store for tests/dev.
///
/// Enforces the same transition and monotonicity rules the job record
/// itself does, so integration tests catch runner sequencing bugs.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, JobStoreError>,
    ) -> Result<T, JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        f(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))?;
        if jobs.contains_key(&job.job_id) {
            return Err(JobStoreError::Conflict(job.job_id));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));
        Ok(result)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.status == status).cloned().collect();
        result.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));
        Ok(result)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<String>,
        end_timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), JobStoreError> {
        self.with_job(job_id, |job| {
            if !job.status.can_transition_to(status) {
                return Err(JobStoreError::Storage(format!(
                    "illegal status transition {} -> {} for job {}",
                    job.status, status, job_id
                )));
            }
            job.status = status;
            if error_message.is_some() {
                job.error_message = error_message;
            }
            if end_timestamp.is_some() {
                job.end_timestamp = end_timestamp;
            }
            Ok(())
        })
    }

    async fn update_progress(
        &self,
        job_id: JobId,
        processed_rows: i64,
    ) -> Result<(), JobStoreError> {
        self.with_job(job_id, |job| {
            job.record_progress(processed_rows)
                .map_err(|e| JobStoreError::Storage(e.to_string()))
        })
    }

    async fn update_output_path(
        &self,
        job_id: JobId,
        output_path: &Path,
    ) -> Result<(), JobStoreError> {
        self.with_job(job_id, |job| {
            job.output_path = Some(output_path.to_path_buf());
            Ok(())
        })
    }
}
