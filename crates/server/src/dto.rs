//! Request and response bodies for the JSON API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskforge_engine::{Task, TaskStatus};

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Body of `GET /api/v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: usize,
}

/// Body of `GET /api/v1/tasks/status/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatsResponse {
    pub stats: HashMap<TaskStatus, usize>,
}

/// Generic success message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Generic error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// First frame sent on a new WebSocket subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsGreeting {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub client_count: usize,
}
