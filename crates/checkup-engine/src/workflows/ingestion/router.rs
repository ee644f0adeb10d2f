use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::alerts::BatchNotifier;
use super::domain::{BatchId, BatchSubmission};
use super::service::{BatchCoordinator, BatchServiceError, ExecutionMode};
use crate::workflows::jobs::JobQueue;

/// Either a raw CSV upload or already-shaped parameter rows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubmitRequest {
    Csv { uploaded_by: String, csv: String },
    Rows(BatchSubmission),
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub approved_by: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// HTTP surface for batch intake and the approval workflow.
pub fn batch_router<Q, N>(coordinator: Arc<BatchCoordinator<Q, N>>) -> Router
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    Router::new()
        .route("/api/v1/batches", post(submit_handler::<Q, N>))
        .route("/api/v1/batches/:batch_id", get(status_handler::<Q, N>))
        .route(
            "/api/v1/batches/:batch_id/reports",
            get(reports_handler::<Q, N>),
        )
        .route(
            "/api/v1/batches/:batch_id/approve",
            post(approve_handler::<Q, N>),
        )
        .route(
            "/api/v1/batches/:batch_id/reject",
            post(reject_handler::<Q, N>),
        )
        .with_state(coordinator)
}

/// Runs coordinator work on the blocking pool; every call takes the store mutex.
async fn off_runtime<Q, N, T, F>(
    coordinator: Arc<BatchCoordinator<Q, N>>,
    work: F,
) -> Result<T, BatchServiceError>
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
    T: Send + 'static,
    F: FnOnce(&BatchCoordinator<Q, N>) -> Result<T, BatchServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&coordinator)).await?
}

pub(crate) async fn submit_handler<Q, N>(
    State(coordinator): State<Arc<BatchCoordinator<Q, N>>>,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Response
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    let result = off_runtime(coordinator, move |coordinator| match request {
        SubmitRequest::Csv { uploaded_by, csv } => {
            coordinator.submit_csv(csv.as_bytes(), &uploaded_by)
        }
        SubmitRequest::Rows(submission) => coordinator.submit(submission),
    })
    .await;

    match result {
        Ok(accepted) => {
            let payload = json!({
                "batch": accepted.record.status_view(),
                "warnings": accepted.warnings,
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn status_handler<Q, N>(
    State(coordinator): State<Arc<BatchCoordinator<Q, N>>>,
    Path(batch_id): Path<String>,
) -> Response
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    let id = BatchId(batch_id);
    match off_runtime(coordinator, move |coordinator| coordinator.get(&id)).await {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reports_handler<Q, N>(
    State(coordinator): State<Arc<BatchCoordinator<Q, N>>>,
    Path(batch_id): Path<String>,
) -> Response
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    let id = BatchId(batch_id);
    let lookup = id.clone();
    match off_runtime(coordinator, move |coordinator| coordinator.reports(&lookup)).await {
        Ok(reports) => {
            let payload = json!({
                "batch_id": id,
                "reports": reports,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn approve_handler<Q, N>(
    State(coordinator): State<Arc<BatchCoordinator<Q, N>>>,
    Path(batch_id): Path<String>,
    axum::Json(request): axum::Json<ApproveRequest>,
) -> Response
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    let id = BatchId(batch_id);
    let approval = off_runtime(coordinator, move |coordinator| {
        coordinator.approve(&id, &request.approved_by)
    });

    match approval.await {
        Ok(outcome) => {
            let status = match outcome.mode {
                ExecutionMode::Synchronous => StatusCode::OK,
                ExecutionMode::Queued => StatusCode::ACCEPTED,
            };
            (status, axum::Json(outcome)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reject_handler<Q, N>(
    State(coordinator): State<Arc<BatchCoordinator<Q, N>>>,
    Path(batch_id): Path<String>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    let id = BatchId(batch_id);
    match off_runtime(coordinator, move |coordinator| coordinator.reject(&id, &request.reason)).await {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: BatchServiceError) -> Response {
    match error {
        BatchServiceError::Validation(report) => {
            let payload = json!({
                "error": "validation_failed",
                "report": report,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        BatchServiceError::NotFound(batch_id) => {
            let payload = json!({
                "error": "batch not found",
                "batch_id": batch_id,
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        BatchServiceError::InvalidState { .. } => {
            let payload = json!({
                "error": error.to_string(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        BatchServiceError::Parse(_) => {
            let payload = json!({
                "error": error.to_string(),
            });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        other => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
