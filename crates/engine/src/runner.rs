//! The bulk job runner: streams input rows through the transformer and
//! owns the job's status transitions.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use bulkscreen_core::JobId;
use bulkscreen_screening::{RetryPolicy, ScreeningClient};

use crate::job::JobStatus;
use crate::store::{JobStore, JobStoreError};
use crate::transformer::{InputRecord, OutputRecord, RowTransformer};

/// Tunables of the streaming loop.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Persist `processed_rows` after every this many rows. A final
    /// checkpoint always runs after the last row.
    pub checkpoint_interval: u64,
    /// Fixed sleep after each processed row; a deliberate throttle for the
    /// provider's rate limit, never skipped when a call is retried.
    pub row_delay: Duration,
    /// Retry policy applied to each screening call.
    pub retry: RetryPolicy,
    /// Whether to dereference the provider's hits resource per row.
    pub fetch_hit_details: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            row_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
            fetch_hit_details: false,
        }
    }
}

/// Failure of a run, recorded into the job's `error_message`.
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed input stream: {0}")]
    Csv(#[from] csv::Error),
    #[error("job store failure: {0}")]
    Store(#[from] JobStoreError),
}

/// Executes one job end to end.
///
/// Exactly one runner instance owns a given job; nothing else writes the
/// job's mutable fields while it runs.
pub struct BulkJobRunner {
    store: Arc<dyn JobStore>,
    transformer: RowTransformer,
    config: RunnerConfig,
}

impl BulkJobRunner {
    pub fn new(store: Arc<dyn JobStore>, client: Arc<dyn ScreeningClient>, config: RunnerConfig) -> Self {
        let transformer =
            RowTransformer::new(client, config.retry).with_hit_details(config.fetch_hit_details);
        Self {
            store,
            transformer,
            config,
        }
    }

    /// Run the job to a terminal status.
    ///
    /// Every failure path ends in a `Failed` status write with the captured
    /// cause; partially written output is left in place for diagnostics.
    pub async fn run(&self, job_id: JobId, input_path: &Path, output_path: &Path) {
        info!(job_id = %job_id, input = %input_path.display(), "starting bulk job");

        match self.execute(job_id, input_path, output_path).await {
            Ok(processed) => {
                info!(job_id = %job_id, processed, "bulk job completed");
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "bulk job failed");
                if let Err(store_err) = self
                    .store
                    .update_status(
                        job_id,
                        JobStatus::Failed,
                        Some(err.to_string()),
                        Some(Utc::now()),
                    )
                    .await
                {
                    // Nothing left to do but log; the reconciler will catch
                    // the orphaned record on the next restart.
                    error!(job_id = %job_id, error = %store_err, "failed to record job failure");
                }
            }
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        input_path: &Path,
        output_path: &Path,
    ) -> Result<i64, RunError> {
        self.store
            .update_status(job_id, JobStatus::Running, None, None)
            .await?;

        // Validate the header before touching the output file: a headerless
        // input must fail without leaving an empty output behind.
        let input = File::open(input_path)
            .map_err(|e| RunError::InvalidInput(format!("cannot open input file: {e}")))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        let mut records = reader.records();

        let header = match records.next() {
            None => {
                return Err(RunError::InvalidInput(
                    "input file is empty; expected a header row".to_string(),
                ));
            }
            Some(Err(e)) => {
                return Err(RunError::InvalidInput(format!("cannot read header row: {e}")));
            }
            Some(Ok(record)) => record,
        };

        let output = File::create(output_path)?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);

        let mut header_row: Vec<&str> = header.iter().collect();
        header_row.extend(OutputRecord::derived_columns(
            self.transformer.includes_hit_details(),
        ));
        writer.write_record(&header_row)?;

        let interval = self.config.checkpoint_interval.max(1) as i64;
        let mut processed: i64 = 0;

        for result in records {
            let record = result?;
            let Some(parsed) = InputRecord::from_record(&record) else {
                // Too few fields: dropped by policy, not counted.
                debug!(job_id = %job_id, fields = record.len(), "skipping malformed row");
                continue;
            };

            let derived = self.transformer.transform(&parsed).await;

            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.extend(derived.into_fields(self.transformer.includes_hit_details()));
            writer.write_record(&row)?;

            processed += 1;
            if processed % interval == 0 {
                self.store.update_progress(job_id, processed).await?;
                debug!(job_id = %job_id, processed, "progress checkpoint");
            }

            if !self.config.row_delay.is_zero() {
                tokio::time::sleep(self.config.row_delay).await;
            }
        }

        // Terminal count is always exact, wherever the interval last landed.
        self.store.update_progress(job_id, processed).await?;

        writer.flush()?;
        drop(writer);

        // Output location first, status last: a `Completed` job always has
        // a fully written, recorded output.
        self.store.update_output_path(job_id, output_path).await?;
        self.store
            .update_status(job_id, JobStatus::Completed, None, Some(Utc::now()))
            .await?;

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use bulkscreen_screening::{CallError, ScreeningRequest, ScreeningVerdict};

    use crate::job::Job;
    use crate::store::InMemoryJobStore;

    use super::*;

    struct StubClient {
        calls: AtomicU32,
        fail: bool,
    }

    impl StubClient {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: false,
            })
        }

        fn timing_out() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl ScreeningClient for StubClient {
        async fn screen(&self, req: &ScreeningRequest) -> Result<ScreeningVerdict, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CallError::Timeout("deadline exceeded".into()));
            }
            Ok(ScreeningVerdict {
                status_code: 200,
                match_status: Some(format!("screened:{}", req.search_term)),
                total_hits: Some(1),
                hits_resource: None,
            })
        }

        async fn fetch_hits(&self, _resource: &str) -> Result<serde_json::Value, CallError> {
            Ok(json!([]))
        }
    }

    /// Store decorator that records every progress checkpoint value.
    struct RecordingStore {
        inner: InMemoryJobStore,
        checkpoints: Mutex<Vec<i64>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryJobStore::new(),
                checkpoints: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
            self.inner.create(job).await
        }

        async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_all().await
        }

        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
            self.inner.find_by_status(status).await
        }

        async fn update_status(
            &self,
            job_id: JobId,
            status: JobStatus,
            error_message: Option<String>,
            end_timestamp: Option<DateTime<Utc>>,
        ) -> Result<(), JobStoreError> {
            self.inner
                .update_status(job_id, status, error_message, end_timestamp)
                .await
        }

        async fn update_progress(
            &self,
            job_id: JobId,
            processed_rows: i64,
        ) -> Result<(), JobStoreError> {
            self.checkpoints.lock().unwrap().push(processed_rows);
            self.inner.update_progress(job_id, processed_rows).await
        }

        async fn update_output_path(
            &self,
            job_id: JobId,
            output_path: &Path,
        ) -> Result<(), JobStoreError> {
            self.inner.update_output_path(job_id, output_path).await
        }
    }

    fn fast_config() -> RunnerConfig {
        RunnerConfig {
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..RunnerConfig::default()
        }
    }

    fn fixture(contents: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.csv");
        let output = dir.path().join("output.csv");
        std::fs::write(&input, contents).expect("write input");
        (dir, input, output)
    }

    async fn submit(store: &dyn JobStore, input: &Path, total_rows: Option<i64>) -> JobId {
        let job = Job::new(input, total_rows);
        store.create(&job).await.unwrap();
        job.job_id
    }

    #[tokio::test]
    async fn round_trip_preserves_rows_and_order() {
        let (_fx, input, output) =
            fixture("id,name,type\n1,Alice,individual\n2,Bob,company\n");
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, Some(2)).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 2);
        assert_eq!(job.output_path(), Some(output.as_path()));
        assert!(job.end_timestamp.is_some());

        let written = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "id,name,type,api_status_code,match_status,total_hits,api_error"
        );
        assert!(lines[1].starts_with("1,Alice,individual,200,screened:Alice,1,"));
        assert!(lines[2].starts_with("2,Bob,company,200,screened:Bob,1,"));
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_and_not_counted() {
        let (_fx, input, output) = fixture(
            "id,name,type\n1,Alice,individual\nshort,row\n2,Bob,company\n",
        );
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, Some(3)).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 2);

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(!written.contains("short,row"));
        // Header + 2 surviving data rows.
        assert_eq!(written.lines().count(), 3);
    }

    #[tokio::test]
    async fn timeout_rows_carry_the_error_and_do_not_abort_the_batch() {
        let (_fx, input, output) = fixture("id,name,type\n1,Alice,individual\n");
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, Some(1)).await;

        let client = StubClient::timing_out();
        BulkJobRunner::new(store.clone(), client.clone(), fast_config())
            .run(job_id, &input, &output)
            .await;

        // 3 attempts for the single row, then the failure is encoded.
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 1);

        let written = std::fs::read_to_string(&output).unwrap();
        let data_line = written.lines().nth(1).unwrap();
        assert!(data_line.starts_with("1,Alice,individual,-1,,,"));
        assert!(data_line.contains("max retries reached"));
    }

    #[tokio::test]
    async fn header_only_input_completes_with_header_only_output() {
        let (_fx, input, output) = fixture("id,name,type\n");
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, Some(0)).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_rows, Some(0));
        assert_eq!(job.processed_rows, 0);

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test]
    async fn empty_input_fails_without_creating_an_output_file() {
        let (_fx, input, output) = fixture("");
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, None).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("invalid input"));
        assert!(job.end_timestamp.is_some());
        assert!(job.output_path.is_none());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn missing_input_file_fails_the_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("does-not-exist.csv");
        let output = dir.path().join("output.csv");

        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, None).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("cannot open input file"));
    }

    #[tokio::test]
    async fn checkpoints_land_on_the_interval_plus_a_final_exact_one() {
        let (_fx, input, output) = fixture(
            "id,name,type\n\
             1,A,individual\n2,B,individual\n3,C,individual\n4,D,individual\n5,E,individual\n",
        );
        let store = Arc::new(RecordingStore::new());
        let job_id = submit(store.as_ref(), &input, Some(5)).await;

        let config = RunnerConfig {
            checkpoint_interval: 2,
            ..fast_config()
        };
        BulkJobRunner::new(store.clone(), StubClient::ok(), config)
            .run(job_id, &input, &output)
            .await;

        let checkpoints = store.checkpoints.lock().unwrap().clone();
        assert_eq!(checkpoints, vec![2, 4, 5]);

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.processed_rows, 5);
    }

    #[tokio::test]
    async fn extra_optional_fields_flow_through_to_the_output() {
        let (_fx, input, output) =
            fixture("id,name,type,dob,pan\n1,Alice,individual,1984,ABCDE1234F\n");
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = submit(store.as_ref(), &input, Some(1)).await;

        BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
            .run(job_id, &input, &output)
            .await;

        let written = std::fs::read_to_string(&output).unwrap();
        let data_line = written.lines().nth(1).unwrap();
        assert!(data_line.starts_with("1,Alice,individual,1984,ABCDE1234F,200,"));
    }

    // Property: at a terminal state, processed_rows equals exactly the
    // number of rows with enough fields, whatever shape the input takes.
    #[test]
    fn processed_rows_equals_non_skipped_rows() {
        use proptest::prelude::*;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        proptest!(ProptestConfig::with_cases(16), |(field_counts in proptest::collection::vec(1usize..6, 0..12))| {
            let mut contents = String::from("id,name,type\n");
            for (i, n) in field_counts.iter().enumerate() {
                let row: Vec<String> = (0..*n).map(|f| format!("r{i}f{f}")).collect();
                contents.push_str(&row.join(","));
                contents.push('\n');
            }
            let expected = field_counts.iter().filter(|n| **n >= 3).count() as i64;

            runtime.block_on(async {
                let (_fx, input, output) = fixture(&contents);
                let store = Arc::new(InMemoryJobStore::new());
                let job_id = submit(store.as_ref(), &input, None).await;

                BulkJobRunner::new(store.clone(), StubClient::ok(), fast_config())
                    .run(job_id, &input, &output)
                    .await;

                let job = store.get(job_id).await.unwrap().unwrap();
                assert_eq!(job.status, JobStatus::Completed);
                assert_eq!(job.processed_rows, expected);
            });
        });
    }
}
