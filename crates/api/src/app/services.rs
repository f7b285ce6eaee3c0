//! Infrastructure wiring for the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use bulkscreen_core::JobId;
use bulkscreen_engine::{BulkJobRunner, JobDispatcher, JobStore, RunnerConfig, TokioDispatcher};
use bulkscreen_infra::PostgresJobStore;
use bulkscreen_screening::{HttpScreeningClient, ScreeningClient, ScreeningServiceConfig};

/// Shared service bundle injected into every handler.
pub struct AppServices {
    pub store: Arc<dyn JobStore>,
    pub runner: Arc<BulkJobRunner>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    data_dir: PathBuf,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn JobStore>,
        client: Arc<dyn ScreeningClient>,
        dispatcher: Arc<dyn JobDispatcher>,
        runner_config: RunnerConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let runner = Arc::new(BulkJobRunner::new(store.clone(), client, runner_config));
        Self {
            store,
            runner,
            dispatcher,
            data_dir: data_dir.into(),
        }
    }

    /// Where an uploaded input file is stored for a given job.
    pub fn upload_path(&self, job_id: JobId) -> PathBuf {
        self.data_dir.join("uploads").join(format!("{job_id}.csv"))
    }

    /// Where the derived output file for a given job is written.
    pub fn output_path(&self, job_id: JobId) -> PathBuf {
        self.data_dir
            .join("outputs")
            .join(format!("{job_id}_output.csv"))
    }

    /// Create the upload/output directories if they do not exist.
    pub async fn ensure_data_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.data_dir.join("uploads")).await?;
        tokio::fs::create_dir_all(self.data_dir.join("outputs")).await?;
        Ok(())
    }
}

/// Build production services from the environment.
///
/// Required: `DATABASE_URL`, `SCREENING_API_URL`, `SCREENING_API_KEY`,
/// `SCREENING_ACCOUNT_ID`. Optional: `DATA_DIR` (default `./data`),
/// `CHECKPOINT_INTERVAL`, `ROW_DELAY_MS`, `SCREENING_TIMEOUT_SECS`.
pub async fn build_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let api_url = std::env::var("SCREENING_API_URL").expect("SCREENING_API_URL must be set");
    let api_key = std::env::var("SCREENING_API_KEY").expect("SCREENING_API_KEY must be set");
    let account_id =
        std::env::var("SCREENING_ACCOUNT_ID").expect("SCREENING_ACCOUNT_ID must be set");
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to Postgres");
    let store = PostgresJobStore::new(pool);
    store
        .ensure_schema()
        .await
        .expect("failed to create jobs schema");

    let mut screening_config = ScreeningServiceConfig::new(api_url, api_key, account_id);
    if let Some(timeout) = env_u64("SCREENING_TIMEOUT_SECS") {
        screening_config = screening_config.with_timeout(Duration::from_secs(timeout));
    }
    let client =
        HttpScreeningClient::new(screening_config).expect("failed to build screening client");

    let mut runner_config = RunnerConfig::default();
    if let Some(interval) = env_u64("CHECKPOINT_INTERVAL") {
        runner_config.checkpoint_interval = interval;
    }
    if let Some(delay_ms) = env_u64("ROW_DELAY_MS") {
        runner_config.row_delay = Duration::from_millis(delay_ms);
    }

    AppServices::new(
        Arc::new(store),
        Arc::new(client),
        Arc::new(TokioDispatcher),
        runner_config,
        data_dir,
    )
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("{name} is not a valid integer, ignoring: {raw}");
                None
            }
        },
        Err(_) => None,
    }
}
