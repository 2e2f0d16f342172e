//! Webhook API Handlers
//!
//! Receives source-control push events.

use axum::{Json, extract::State, http::StatusCode};
use ferry_core::dto::run::{PushEvent, TriggerResponse};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::service::run_service::RunService;

/// POST /api/hooks/push
/// Start a run for a push to the designated branch
///
/// Responds 202 when a run was queued and 200 when the push was ignored.
pub async fn handle_push(
    State(service): State<Arc<RunService>>,
    Json(event): Json<PushEvent>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    tracing::debug!("Push event for {} at {}", event.git_ref, event.after);

    let response = service.handle_push(event)?;
    let status = if response.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(response)))
}
