use chrono::{DateTime, Utc};
use serde::Serialize;

use bulkscreen_engine::Job;

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub input_file_path: String,
    pub output_file_path: Option<String>,
    pub total_rows: Option<i64>,
    pub processed_rows: i64,
    pub error_message: Option<String>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            status: job.status.to_string(),
            start_timestamp: job.start_timestamp,
            end_timestamp: job.end_timestamp,
            input_file_path: job.input_path.to_string_lossy().into_owned(),
            output_file_path: job
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            error_message: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status: String,
    pub total_rows: Option<i64>,
}

impl From<&Job> for JobAccepted {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            status: job.status.to_string(),
            total_rows: job.total_rows,
        }
    }
}
