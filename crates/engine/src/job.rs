//! The job record and its status state machine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulkscreen_core::{DomainError, DomainResult, JobId};

/// Job execution status.
///
/// Transitions are one-directional: `Pending → Running → {Completed,
/// Failed}`. The only correction is the reconciler forcing an orphaned
/// `Running` job to `Failed` at startup, which is an ordinary
/// `Running → Failed` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a runner to pick it up.
    Pending,
    /// Owned by exactly one runner instance.
    Running,
    /// All rows consumed, output written.
    Completed,
    /// Aborted; `error_message` carries the cause.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bulk screening job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, assigned at creation, immutable.
    pub job_id: JobId,
    pub status: JobStatus,
    /// Set at creation, immutable.
    pub start_timestamp: DateTime<Utc>,
    /// Set exactly once, on entering a terminal status.
    pub end_timestamp: Option<DateTime<Utc>>,
    /// Location of the uploaded input file, immutable once set.
    pub input_path: PathBuf,
    /// Location of the derived output file; `Some` iff `Completed`.
    pub output_path: Option<PathBuf>,
    /// Data-row count of the input (header excluded), computed once at
    /// submission. `None` when the stream could not be counted cheaply.
    pub total_rows: Option<i64>,
    /// Monotonically non-decreasing; written only by the owning runner.
    pub processed_rows: i64,
    /// Set at most once, on the transition to `Failed`.
    pub error_message: Option<String>,
}

impl Job {
    /// Create a new `Pending` job for an uploaded input file.
    pub fn new(input_path: impl Into<PathBuf>, total_rows: Option<i64>) -> Self {
        Self {
            job_id: JobId::new(),
            status: JobStatus::Pending,
            start_timestamp: Utc::now(),
            end_timestamp: None,
            input_path: input_path.into(),
            output_path: None,
            total_rows,
            processed_rows: 0,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "illegal status transition {} -> {} for job {}",
                self.status, next, self.job_id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// `Pending → Running`; first action when a runner accepts the job.
    pub fn mark_running(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::Running)
    }

    /// `Running → Completed`; records the output location and end time.
    pub fn mark_completed(&mut self, output_path: impl Into<PathBuf>) -> DomainResult<()> {
        self.transition(JobStatus::Completed)?;
        self.output_path = Some(output_path.into());
        self.end_timestamp = Some(Utc::now());
        Ok(())
    }

    /// `{Pending, Running} → Failed`; records the cause and end time.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(error.into());
        self.end_timestamp = Some(Utc::now());
        Ok(())
    }

    /// Record a progress checkpoint.
    ///
    /// Rejects regressions and counts above a known `total_rows`.
    pub fn record_progress(&mut self, processed_rows: i64) -> DomainResult<()> {
        if processed_rows < self.processed_rows {
            return Err(DomainError::invariant(format!(
                "processed_rows may not decrease ({} -> {}) for job {}",
                self.processed_rows, processed_rows, self.job_id
            )));
        }
        if let Some(total) = self.total_rows {
            if processed_rows > total {
                return Err(DomainError::invariant(format!(
                    "processed_rows {} exceeds total_rows {} for job {}",
                    processed_rows, total, self.job_id
                )));
            }
        }
        self.processed_rows = processed_rows;
        Ok(())
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_happy_path() {
        let mut job = Job::new("/data/in.csv", Some(2));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.end_timestamp.is_none());

        job.mark_running().unwrap();
        assert_eq!(job.status, JobStatus::Running);

        job.mark_completed("/data/out.csv").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.end_timestamp.is_some());
        assert_eq!(job.output_path(), Some(Path::new("/data/out.csv")));
    }

    #[test]
    fn failure_records_message_and_end_time() {
        let mut job = Job::new("/data/in.csv", None);
        job.mark_running().unwrap();
        job.mark_failed("boom").unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.end_timestamp.is_some());
        assert!(job.output_path.is_none());
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut job = Job::new("/data/in.csv", None);
        job.mark_running().unwrap();
        job.mark_completed("/data/out.csv").unwrap();

        assert!(job.mark_running().is_err());
        assert!(job.mark_failed("late").is_err());
    }

    #[test]
    fn pending_cannot_jump_straight_to_completed() {
        let mut job = Job::new("/data/in.csv", None);
        assert!(job.mark_completed("/data/out.csv").is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let mut job = Job::new("/data/in.csv", Some(10));
        job.record_progress(4).unwrap();
        job.record_progress(4).unwrap();
        job.record_progress(10).unwrap();

        assert!(job.record_progress(9).is_err());
        assert!(job.record_progress(11).is_err());
        assert_eq!(job.processed_rows, 10);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("paused").is_err());
    }
}
