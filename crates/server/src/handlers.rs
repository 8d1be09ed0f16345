//! JSON API handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use taskforge_engine::TaskStatus;

use crate::dto::{
    ErrorResponse, HealthResponse, MessageResponse, SubmitTaskRequest, TaskListResponse,
    TaskStatsResponse,
};
use crate::state::AppState;

const TRACING_TARGET: &str = "taskforge_server::api";

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        message: "task service is running".into(),
    })
}

pub(crate) async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Response {
    let task = state.manager.submit(req.name, req.payload);

    // A task rejected by the pool comes back terminal with the rejection
    // recorded on it; surface that as a server-side failure.
    let status = if task.status == TaskStatus::Failed {
        tracing::warn!(
            target: TRACING_TARGET,
            task_id = %task.id,
            error = task.error.as_deref().unwrap_or_default(),
            "task submission failed"
        );
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::CREATED
    };
    (status, Json(task)).into_response()
}

pub(crate) async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.get(&id) {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(err) => not_found(err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    status: Option<TaskStatus>,
}

pub(crate) async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<TaskListResponse> {
    let tasks = match params.status {
        Some(status) => state.manager.get_by_status(status),
        None => state.manager.get_all(),
    };
    Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    })
}

pub(crate) async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.cancel(&id) {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Task cancelled successfully".into(),
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(target: TRACING_TARGET, task_id = %id, error = %err, "cancel failed");
            not_found(err)
        }
    }
}

pub(crate) async fn task_stats(State(state): State<AppState>) -> Json<TaskStatsResponse> {
    Json(TaskStatsResponse {
        stats: state.manager.stats(),
    })
}

fn not_found(err: taskforge_engine::Error) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}
