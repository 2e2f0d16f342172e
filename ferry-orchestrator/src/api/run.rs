//! Run API Handlers
//!
//! HTTP endpoints for inspecting and cancelling release runs.

use axum::{
    Json,
    extract::{Path, State},
};
use ferry_core::domain::run::RunRecord;
use ferry_core::dto::run::CancelResponse;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::run_service::RunService;

/// GET /api/runs
/// List all runs, newest first
pub async fn list_runs(State(service): State<Arc<RunService>>) -> Json<Vec<RunRecord>> {
    tracing::debug!("Listing runs");
    Json(service.list_runs())
}

/// GET /api/runs/{id}
/// Get run details by ID
pub async fn get_run(
    State(service): State<Arc<RunService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunRecord>> {
    tracing::debug!("Getting run: {}", id);
    Ok(Json(service.get_run(id)?))
}

/// POST /api/runs/{id}/cancel
/// Request cancellation of a queued or running run
pub async fn cancel_run(
    State(service): State<Arc<RunService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    tracing::info!("Cancelling run: {}", id);
    Ok(Json(service.cancel_run(id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fakes::{Fixture, push};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_get_unknown_run_is_not_found() {
        let fixture = Fixture::new(true);
        let service = Arc::new(fixture.service.clone());

        let err = get_run(State(service), Path(Uuid::new_v4()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_get_runs() {
        let fixture = Fixture::new(true);
        let service = Arc::new(fixture.service.clone());

        let id = service
            .handle_push(push("refs/heads/main", "abc123"))
            .unwrap()
            .run_id
            .unwrap();

        let Json(runs) = list_runs(State(service.clone())).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, id);

        let Json(run) = get_run(State(service), Path(id)).await.unwrap();
        assert_eq!(run.commit.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_not_found() {
        let fixture = Fixture::new(true);
        let service = Arc::new(fixture.service.clone());

        let err = cancel_run(State(service), Path(Uuid::new_v4()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
