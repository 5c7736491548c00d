mod dispatcher;
mod models;
mod service;
mod store;

pub use dispatcher::{JobDispatcher, JobRunner, RunSink};
pub use models::*;
pub use service::JobService;
pub use store::JobStore;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::warn;

use std::sync::Arc;

/// Build the job API router.
pub fn routes() -> Router {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/:id", get(get_job).delete(delete_job))
        .route("/:id/execute", post(execute_job))
        .route("/:id/runs", get(list_runs))
        .route("/:id/runs/:run_id", get(get_run))
}

async fn list_jobs(Extension(service): Extension<Arc<JobService>>) -> Response {
    let jobs = service.list_jobs().await;
    (StatusCode::OK, Json(JobListResponse { jobs })).into_response()
}

async fn create_job(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    match service.create_job(request).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(err) => {
            let message = format!("{:#}", err);
            let status = classify_error(&message);
            warn!(error = %message, "failed to create job");
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}

async fn get_job(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> Response {
    match service.get_job(&id).await {
        Some(detail) => (StatusCode::OK, Json(detail)).into_response(),
        None => job_not_found(&id),
    }
}

async fn delete_job(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> Response {
    if service.delete_job(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        job_not_found(&id)
    }
}

async fn execute_job(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> Response {
    match service.execute(&id).await {
        Some(run) => (StatusCode::ACCEPTED, Json(run)).into_response(),
        None => job_not_found(&id),
    }
}

async fn list_runs(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
    Query(query): Query<ListRunsQuery>,
) -> Response {
    let status_filter = match query.status.as_deref() {
        Some(raw) => match RunStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "Invalid status filter",
                        "allowed": RunStatus::ALLOWED,
                    })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    match service.list_runs(&id, status_filter).await {
        Some(runs) => (StatusCode::OK, Json(RunListResponse { job_id: id, runs })).into_response(),
        None => job_not_found(&id),
    }
}

async fn get_run(
    Extension(service): Extension<Arc<JobService>>,
    Path((id, run_id)): Path<(String, String)>,
) -> Response {
    match service.get_run(&id, &run_id).await {
        Some(run) => (StatusCode::OK, Json(run)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Run not found",
                "job_id": id,
                "run_id": run_id
            })),
        )
            .into_response(),
    }
}

fn job_not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Job not found", "job_id": id })),
    )
        .into_response()
}

fn classify_error(message: &str) -> StatusCode {
    if message.contains("not found") {
        StatusCode::NOT_FOUND
    } else if message.contains("unsupported")
        || message.contains("must")
        || message.contains("cannot")
    {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_error_maps_validation_failures() {
        assert_eq!(
            classify_error("unsupported language \"cobol\""),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify_error("timeout and timeout_secs cannot both be set"),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(classify_error("run r1 not found"), StatusCode::NOT_FOUND);
        assert_eq!(
            classify_error("disk on fire"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
