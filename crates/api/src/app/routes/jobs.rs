use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Multipart, Path},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tracing::{error, info};

use bulkscreen_core::JobId;
use bulkscreen_engine::{Job, JobStatus};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", axum::routing::post(submit_job).get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/output", get(download_output))
}

/// Accept a CSV upload, persist a `Pending` job, and hand execution to the
/// background dispatcher. Responds `202` as soon as the job is durable.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let mut upload: Option<(Option<String>, axum::body::Bytes)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((file_name, bytes));
                        break;
                    }
                    Err(e) => {
                        return errors::json_error(
                            StatusCode::BAD_REQUEST,
                            "upload_error",
                            format!("failed to read uploaded file: {e}"),
                        );
                    }
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "upload_error",
                    format!("malformed multipart body: {e}"),
                );
            }
        }
    }

    let Some((file_name, bytes)) = upload else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_file",
            "multipart field 'file' is required",
        );
    };

    if let Some(name) = &file_name {
        if !name.to_lowercase().ends_with(".csv") {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_file_type",
                "only .csv uploads are accepted",
            );
        }
    }

    let job_id = JobId::new();
    let input_path = services.upload_path(job_id);
    let output_path = services.output_path(job_id);

    if let Err(e) = services.ensure_data_dirs().await {
        error!("failed to create data directories: {e}");
        return errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "failed to prepare storage",
        );
    }
    if let Err(e) = tokio::fs::write(&input_path, &bytes).await {
        error!(%job_id, "failed to persist upload: {e}");
        return errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "failed to persist uploaded file",
        );
    }

    let total_rows = count_data_rows(&bytes);

    let mut job = Job::new(&input_path, Some(total_rows));
    job.job_id = job_id;
    if let Err(e) = services.store.create(&job).await {
        return errors::store_error_to_response(e);
    }

    info!(%job_id, total_rows, "job accepted");

    let runner = services.runner.clone();
    services.dispatcher.dispatch(
        job_id,
        Box::pin(async move {
            runner.run(job_id, &input_path, &output_path).await;
        }),
    );

    (StatusCode::ACCEPTED, Json(dto::JobAccepted::from(&job))).into_response()
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.list_all().await {
        Ok(jobs) => {
            let body: Vec<dto::JobResponse> = jobs.iter().map(dto::JobResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.store.get(job_id).await {
        Ok(Some(job)) => Json(dto::JobResponse::from(&job)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {job_id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Download the derived output file. Available only once the job has
/// completed; anything earlier is a 404.
pub async fn download_output(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    let job = match services.store.get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("job {job_id} not found"),
            );
        }
        Err(e) => return errors::store_error_to_response(e),
    };

    if job.status != JobStatus::Completed {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "output_not_ready",
            format!("job {job_id} is {}; output exists only for completed jobs", job.status),
        );
    }
    let Some(output_path) = job.output_path else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "output_not_ready",
            format!("job {job_id} has no recorded output file"),
        );
    };

    match tokio::fs::read(&output_path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{job_id}_output.csv\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!(%job_id, "failed to read output file: {e}");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "output file could not be read",
            )
        }
    }
}

/// Count the data rows of an uploaded CSV (header excluded).
fn count_data_rows(bytes: &[u8]) -> i64 {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let records = reader.records().filter(|r| r.is_ok()).count();
    records.saturating_sub(1) as i64
}
