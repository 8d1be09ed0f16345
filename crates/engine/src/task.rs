//! Task model and the update messages derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a task.
///
/// Legal transitions are `Pending -> Running -> {Completed, Failed}` and
/// `{Pending, Running} -> Cancelled`. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker.
    Pending,
    /// Being executed by a worker.
    Running,
    /// Finished successfully; `result` is set.
    Completed,
    /// Finished with an error; `error` is set.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The wire name of the status (`pending`, `running`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted unit of asynchronous work.
///
/// The registry owns the authoritative copy; values handed out by the
/// registry are point-in-time snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque id, unique within the process lifetime.
    pub id: String,
    /// Logical job kind; selects the executor.
    pub name: String,
    /// Opaque value carried unchanged from submitter to executor.
    pub payload: Value,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Executor output, set only on `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, set only on `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completion percentage, 0..=100, monotonically non-decreasing.
    pub progress: u8,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Set when the task first enters `Running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the task enters a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a fresh `Pending` task.
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A task state transition, as delivered to update subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// Id of the task this update describes.
    pub task_id: String,
    /// Status after the transition.
    pub status: TaskStatus,
    /// Progress after the transition, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Result, present on `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, present on `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
}

impl TaskUpdate {
    /// Builds an update from the task's current state.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: Some(task.progress),
            result: task.result.clone(),
            error: task.error.clone(),
            timestamp: Utc::now(),
        }
    }
}
