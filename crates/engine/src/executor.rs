//! Executor selection and the built-in task kinds.
//!
//! Executors are async functions selected by task name at submission time.
//! They receive a [`JobContext`] and cooperate with cancellation by checking
//! the per-job token at their natural check-points.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::TaskRegistry;
use crate::task::{TaskStatus, TaskUpdate};
use crate::worker::publish_update;

const TRACING_TARGET: &str = "taskforge_engine::executor";

/// Future returned by a task executor.
pub type ExecutorFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A task executor: consumes a [`JobContext`], produces the task result.
pub type TaskExecutor = Arc<dyn Fn(JobContext) -> ExecutorFuture + Send + Sync>;

/// Everything an executor may touch while running one job.
pub struct JobContext {
    task_id: String,
    payload: Value,
    cancel: CancellationToken,
    registry: Arc<TaskRegistry>,
    update_tx: mpsc::Sender<TaskUpdate>,
}

impl JobContext {
    pub(crate) fn new(
        task_id: String,
        payload: Value,
        cancel: CancellationToken,
        registry: Arc<TaskRegistry>,
        update_tx: mpsc::Sender<TaskUpdate>,
    ) -> Self {
        Self {
            task_id,
            payload,
            cancel,
            registry,
            update_tx,
        }
    }

    /// Id of the task being executed.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The opaque payload supplied at submission.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Whether cancellation has been requested for this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested for this job.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Records monotonic progress (clamped to 100) and emits a `Running`
    /// update. Regressions and updates to non-running tasks are ignored.
    pub fn set_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let Some((snapshot, applied)) = self.registry.modify(&self.task_id, |task| {
            if task.status != TaskStatus::Running || percent <= task.progress {
                return false;
            }
            task.progress = percent;
            true
        }) else {
            return;
        };

        if applied {
            publish_update(&self.update_tx, TaskUpdate::from_task(&snapshot));
        }
    }
}

/// Static mapping from task name to executor, populated at construction.
///
/// Unknown names resolve to a fallback that records the payload into the
/// result field.
pub struct ExecutorRegistry {
    entries: HashMap<String, TaskExecutor>,
    fallback: TaskExecutor,
}

impl ExecutorRegistry {
    /// The registry of built-in task kinds.
    pub fn builtin() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            fallback: boxed(default_task),
        };
        registry.register("example_task", example_task);
        registry.register("long_running_task", long_running_task);
        registry
    }

    /// Adds or replaces the executor for `name`.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, executor: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.entries.insert(name.into(), boxed(executor));
    }

    /// Resolves `name` to its executor, falling back to the default.
    pub fn resolve(&self, name: &str) -> TaskExecutor {
        self.entries.get(name).unwrap_or(&self.fallback).clone()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn boxed<F, Fut>(f: F) -> TaskExecutor
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

async fn example_task(ctx: JobContext) -> anyhow::Result<Value> {
    tracing::info!(target: TRACING_TARGET, task_id = %ctx.task_id(), "executing example task");
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(json!({
        "message": "Task completed successfully",
        "data": ctx.payload(),
    }))
}

async fn long_running_task(ctx: JobContext) -> anyhow::Result<Value> {
    tracing::info!(target: TRACING_TARGET, task_id = %ctx.task_id(), "executing long running task");
    for step in 1..=10u8 {
        tokio::select! {
            () = ctx.cancelled() => anyhow::bail!("task cancelled"),
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
        ctx.set_progress(step * 10);
    }
    Ok(json!({
        "message": "Long running task completed",
        "steps": 10,
    }))
}

async fn default_task(ctx: JobContext) -> anyhow::Result<Value> {
    tracing::info!(target: TRACING_TARGET, task_id = %ctx.task_id(), "executing default task");
    Ok(Value::String(format!("Processed payload: {}", ctx.payload())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn context(task_id: &str, payload: Value) -> (JobContext, Arc<TaskRegistry>) {
        let registry = Arc::new(TaskRegistry::new());
        let mut task = Task::new(task_id, "test_task", payload.clone());
        task.status = TaskStatus::Running;
        registry.store(task);

        let (update_tx, _update_rx) = mpsc::channel(16);
        let ctx = JobContext::new(
            task_id.to_string(),
            payload,
            CancellationToken::new(),
            Arc::clone(&registry),
            update_tx,
        );
        (ctx, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn example_task_echoes_payload() {
        let (ctx, _registry) = context("task-1", json!("hello"));
        let result = example_task(ctx).await.unwrap();
        assert_eq!(result["message"], "Task completed successfully");
        assert_eq!(result["data"], json!("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_task_reports_progress() {
        let (ctx, registry) = context("task-1", Value::Null);
        let result = long_running_task(ctx).await.unwrap();
        assert_eq!(result["steps"], 10);
        assert_eq!(registry.get("task-1").unwrap().progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_task_stops_on_cancellation() {
        let (ctx, _registry) = context("task-1", Value::Null);
        ctx.cancel.cancel();
        let err = long_running_task(ctx).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn default_task_formats_payload() {
        let (ctx, _registry) = context("task-1", json!({"k": 1}));
        let result = default_task(ctx).await.unwrap();
        assert_eq!(result, Value::String("Processed payload: {\"k\":1}".into()));
    }

    #[tokio::test]
    async fn unknown_name_resolves_to_fallback() {
        let registry = ExecutorRegistry::builtin();
        let (ctx, _task_registry) = context("task-1", json!(42));
        let result = registry.resolve("no_such_task")(ctx).await.unwrap();
        assert_eq!(result, Value::String("Processed payload: 42".into()));
    }

    #[test]
    fn progress_never_regresses() {
        let (ctx, registry) = context("task-1", Value::Null);
        ctx.set_progress(40);
        ctx.set_progress(20);
        assert_eq!(registry.get("task-1").unwrap().progress, 40);
        ctx.set_progress(200);
        assert_eq!(registry.get("task-1").unwrap().progress, 100);
    }
}
