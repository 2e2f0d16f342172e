//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod hook;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::run_service::RunService;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<RunService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Source-control webhooks
        .route("/api/hooks/push", post(hook::handle_push))
        // Run endpoints
        .route("/api/runs", get(run::list_runs))
        .route("/api/runs/{id}", get(run::get_run))
        .route("/api/runs/{id}/cancel", post(run::cancel_run))
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
