//! Route table for the HTTP API.

use axum::Router;
use axum::routing::get;

use crate::state::AppState;
use crate::{handlers, ws};

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/tasks",
            get(handlers::list_tasks).post(handlers::submit_task),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(handlers::get_task).delete(handlers::cancel_task),
        )
        .route("/api/v1/tasks/status/stats", get(handlers::task_stats))
        .route("/api/v1/ws/tasks", get(ws::task_updates))
        .with_state(state)
}
