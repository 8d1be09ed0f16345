//! Typed errors surfaced by the engine.

use std::time::Duration;

/// Errors reported to callers of the engine.
///
/// Executor failures and panics are not represented here: they are recorded
/// on the task itself (`Failed` + `error`), because the submitter already
/// holds the task handle and observes them by polling or subscribing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bounded job queue had no room for the submission.
    #[error("task queue is full")]
    QueueFull,

    /// No task with the given id is known to the registry.
    #[error("task not found: {0}")]
    NotFound(String),

    /// The pool has been stopped and accepts no further work.
    #[error("worker pool is not running")]
    PoolStopped,

    /// Workers did not finish within the shutdown timeout.
    #[error("worker pool shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The supplied configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
