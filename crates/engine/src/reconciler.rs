//! Startup recovery for jobs orphaned by an unclean shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::job::JobStatus;
use crate::store::{JobStore, JobStoreError};

/// Failure cause recorded on jobs recovered after an unclean restart.
pub const ORPHANED_JOB_MESSAGE: &str =
    "job was interrupted by an unclean shutdown; resubmit the input file";

/// Resolves jobs left `Running` by a previous process.
///
/// A `Running` job found at startup is provably orphaned — its owning
/// runner no longer exists — so it is forced to `Failed` rather than
/// resumed. Must run before any new job is accepted; the one-shot guard
/// keeps a second call within the same process from firing again.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    fired: AtomicBool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            fired: AtomicBool::new(false),
        }
    }

    /// Fail every orphaned job. Returns how many were corrected.
    pub async fn run(&self) -> Result<usize, JobStoreError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("reconciler already ran in this process; skipping");
            return Ok(0);
        }

        let orphaned = self.store.find_by_status(JobStatus::Running).await?;
        for job in &orphaned {
            warn!(job_id = %job.job_id, "failing job orphaned by unclean shutdown");
            self.store
                .update_status(
                    job.job_id,
                    JobStatus::Failed,
                    Some(ORPHANED_JOB_MESSAGE.to_string()),
                    Some(Utc::now()),
                )
                .await?;
        }

        if orphaned.is_empty() {
            debug!("no orphaned jobs found");
        } else {
            info!(count = orphaned.len(), "recovered orphaned jobs");
        }
        Ok(orphaned.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::job::Job;
    use crate::store::InMemoryJobStore;

    use super::*;

    async fn store_with_running_job() -> (Arc<InMemoryJobStore>, Job) {
        let store = Arc::new(InMemoryJobStore::new());
        let mut job = Job::new("/data/in.csv", Some(100));
        job.mark_running().unwrap();
        job.processed_rows = 40;
        store.create(&job).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn orphaned_running_job_is_failed_with_a_cause() {
        let (store, job) = store_with_running_job().await;

        let reconciler = Reconciler::new(store.clone());
        assert_eq!(reconciler.run().await.unwrap(), 1);

        let recovered = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(recovered.error_message.as_deref(), Some(ORPHANED_JOB_MESSAGE));
        assert!(recovered.end_timestamp.is_some());
        // Progress made before the crash is preserved for diagnostics.
        assert_eq!(recovered.processed_rows, 40);
    }

    #[tokio::test]
    async fn second_run_in_the_same_process_does_not_fire() {
        let (store, _job) = store_with_running_job().await;

        let reconciler = Reconciler::new(store.clone());
        assert_eq!(reconciler.run().await.unwrap(), 1);
        assert_eq!(reconciler.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_running_jobs_means_a_no_op() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new("/data/in.csv", None);
        store.create(&job).await.unwrap();

        let before = store.list_all().await.unwrap();
        assert_eq!(Reconciler::new(store.clone()).run().await.unwrap(), 0);
        let after = store.list_all().await.unwrap();

        assert_eq!(before.len(), after.len());
        assert_eq!(after[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_jobs_are_left_untouched() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut done = Job::new("/data/in.csv", Some(1));
        done.mark_running().unwrap();
        done.mark_completed("/data/out.csv").unwrap();
        store.create(&done).await.unwrap();

        assert_eq!(Reconciler::new(store.clone()).run().await.unwrap(), 0);
        let job = store.get(done.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
