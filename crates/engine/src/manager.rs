//! The public surface binding the registry and the pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{TaskConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::executor::ExecutorRegistry;
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskStatus, TaskUpdate};
use crate::worker::JobWrapper;

const TRACING_TARGET: &str = "taskforge_engine::manager";

/// Binds registry and pool; the only submission surface for the rest of the
/// system.
pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    pool: Arc<WorkerPool>,
    executors: ExecutorRegistry,
    task_cfg: TaskConfig,
    jobs: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskManager {
    /// Creates a manager with the built-in executor table.
    pub fn new(worker_cfg: WorkerConfig, task_cfg: TaskConfig) -> Result<Self> {
        Self::with_executors(worker_cfg, task_cfg, ExecutorRegistry::builtin())
    }

    /// Creates a manager with a custom executor table.
    pub fn with_executors(
        worker_cfg: WorkerConfig,
        task_cfg: TaskConfig,
        executors: ExecutorRegistry,
    ) -> Result<Self> {
        worker_cfg.validate()?;
        task_cfg.validate()?;

        let registry = Arc::new(TaskRegistry::new());
        let pool = Arc::new(WorkerPool::new(
            worker_cfg,
            &task_cfg,
            Arc::clone(&registry),
        ));

        Ok(Self {
            registry,
            pool,
            executors,
            task_cfg,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the worker pool.
    pub fn start(&self) {
        Arc::clone(&self.pool).start();
        tracing::info!(target: TRACING_TARGET, "task manager started");
    }

    /// Stops the worker pool, waiting up to its shutdown timeout.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(target: TRACING_TARGET, "stopping task manager");
        self.pool.stop().await
    }

    /// Submits a named work item.
    ///
    /// The returned task is already stored in the registry. When the pool
    /// rejects the submission the task comes back terminal (`Failed`) with
    /// the rejection recorded in `error`.
    pub fn submit(&self, name: impl Into<String>, payload: Value) -> Task {
        let name = name.into();
        let mut task = Task::new(Uuid::new_v4().to_string(), name.clone(), payload);
        let task_id = task.id.clone();
        self.registry.store(task.clone());

        let cancel = self.pool.job_token();
        self.jobs_lock().insert(task_id.clone(), cancel.clone());

        let wrapper = JobWrapper {
            task_id: task_id.clone(),
            executor: self.executors.resolve(&name),
            cancel,
            timeout: self.task_cfg.default_task_timeout,
        };

        match self.pool.submit(wrapper) {
            Ok(()) => {
                tracing::info!(
                    target: TRACING_TARGET,
                    task_id = %task_id,
                    task_name = %name,
                    "task submitted"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    task_id = %task_id,
                    task_name = %name,
                    error = %err,
                    "task submission rejected"
                );
                task.status = TaskStatus::Failed;
                task.error = Some(format!("failed to submit task: {err}"));
                task.completed_at = Some(Utc::now());
                self.registry.update(task.clone());
                if let Some(token) = self.jobs_lock().remove(&task_id) {
                    token.cancel();
                }
                self.pool.publish_update(TaskUpdate::from_task(&task));
            }
        }

        task
    }

    /// Looks up a task by id.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Snapshot of every known task.
    pub fn get_all(&self) -> Vec<Task> {
        self.registry.get_all()
    }

    /// Snapshot of every task currently in `status`.
    pub fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.registry.get_by_status(status)
    }

    /// Task counts partitioned by status.
    pub fn stats(&self) -> HashMap<TaskStatus, usize> {
        self.registry.stats()
    }

    /// Cancels a task.
    ///
    /// A non-terminal task transitions to `Cancelled` and its per-job context
    /// is cancelled so a cooperating executor can exit at its next
    /// check-point. Cancelling an already terminal task is a no-op; the
    /// post-cancel snapshot is returned either way.
    pub fn cancel(&self, id: &str) -> Result<Task> {
        let Some((task, applied)) = self.registry.modify(id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            true
        }) else {
            return Err(Error::NotFound(id.to_string()));
        };

        if !applied {
            tracing::debug!(
                target: TRACING_TARGET,
                task_id = %id,
                status = %task.status,
                "cancel ignored for terminal task"
            );
            return Ok(task);
        }

        if let Some(token) = self.jobs_lock().remove(id) {
            token.cancel();
        }
        self.pool.publish_update(TaskUpdate::from_task(&task));
        tracing::info!(target: TRACING_TARGET, task_id = %id, "task cancelled");
        Ok(task)
    }

    /// Evicts terminal tasks older than the configured TTL. Returns the
    /// number removed.
    pub fn reap(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.task_cfg.cleanup_completed_tasks_after)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.registry.cleanup_completed(cutoff);

        // Finished jobs have had their tokens cancelled; drop the handles.
        self.jobs_lock().retain(|_, token| !token.is_cancelled());
        removed
    }

    /// Takes the receiving end of the pool's update channel. Yields `Some`
    /// exactly once.
    pub fn take_update_receiver(&self) -> Option<mpsc::Receiver<TaskUpdate>> {
        self.pool.take_update_receiver()
    }

    /// The pool behind this manager, for observability.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn jobs_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> TaskManager {
        TaskManager::new(
            WorkerConfig {
                min_workers: 1,
                max_workers: 2,
                enable_auto_scaling: false,
                ..WorkerConfig::default()
            },
            TaskConfig {
                queue_capacity: 4,
                ..TaskConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let result = TaskManager::new(
            WorkerConfig {
                min_workers: 5,
                max_workers: 1,
                ..WorkerConfig::default()
            },
            TaskConfig::default(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn submit_stores_pending_task_with_stable_identity() {
        let manager = manager();
        let task = manager.submit("example_task", json!("hello"));

        assert_eq!(task.status, TaskStatus::Pending);
        let found = manager.get(&task.id).unwrap();
        assert_eq!(found.id, task.id);
        assert_eq!(found.name, "example_task");
        assert_eq!(found.payload, json!("hello"));

        let other = manager.submit("example_task", json!("hello"));
        assert_ne!(task.id, other.id);
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let manager = manager();
        assert!(matches!(manager.get("missing"), Err(Error::NotFound(_))));
        assert!(matches!(manager.cancel("missing"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn cancel_pending_task_is_terminal() {
        let manager = manager();
        let task = manager.submit("example_task", json!(null));

        let cancelled = manager.cancel(&task.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_tasks() {
        let manager = manager();
        let task = manager.submit("example_task", json!(null));
        manager.cancel(&task.id).unwrap();

        let again = manager.cancel(&task.id).unwrap();
        assert_eq!(again.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn queue_rejection_fails_the_task() {
        let manager = TaskManager::new(
            WorkerConfig {
                min_workers: 1,
                max_workers: 1,
                enable_auto_scaling: false,
                ..WorkerConfig::default()
            },
            TaskConfig {
                queue_capacity: 1,
                ..TaskConfig::default()
            },
        )
        .unwrap();

        // Pool not started: the single queue slot fills and stays full.
        let first = manager.submit("example_task", json!(1));
        assert_eq!(first.status, TaskStatus::Pending);

        let rejected = manager.submit("example_task", json!(2));
        assert_eq!(rejected.status, TaskStatus::Failed);
        let error = rejected.error.as_deref().unwrap_or_default();
        assert!(error.contains("queue is full"), "unexpected error: {error}");
        assert!(rejected.completed_at.is_some());

        let stored = manager.get(&rejected.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn reap_evicts_old_terminal_tasks() {
        let manager = TaskManager::new(
            WorkerConfig {
                min_workers: 1,
                max_workers: 1,
                enable_auto_scaling: false,
                ..WorkerConfig::default()
            },
            TaskConfig {
                queue_capacity: 4,
                cleanup_completed_tasks_after: Duration::ZERO,
                ..TaskConfig::default()
            },
        )
        .unwrap();

        let kept = manager.submit("example_task", json!(null));
        let task = manager.submit("example_task", json!(null));
        manager.cancel(&task.id).unwrap();

        // Let the completion timestamp fall strictly behind the cutoff.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.reap(), 1);
        assert!(manager.get(&task.id).is_err());
        assert!(manager.get(&kept.id).is_ok());
    }

    #[tokio::test]
    async fn stats_match_get_all_partition() {
        let manager = manager();
        for i in 0..3 {
            manager.submit("example_task", json!(i));
        }
        let task = manager.submit("example_task", json!(3));
        manager.cancel(&task.id).unwrap();

        let stats = manager.stats();
        let all = manager.get_all();
        assert_eq!(stats.values().sum::<usize>(), all.len());
        assert_eq!(stats[&TaskStatus::Pending], 3);
        assert_eq!(stats[&TaskStatus::Cancelled], 1);
        assert_eq!(manager.get_by_status(TaskStatus::Pending).len(), 3);
    }
}
