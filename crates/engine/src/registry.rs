//! Thread-safe index of all known tasks.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::task::{Task, TaskStatus};

const TRACING_TARGET: &str = "taskforge_engine::registry";

/// The authoritative in-memory index of tasks, keyed by id.
///
/// Many concurrent readers, one writer. Values handed out are snapshots;
/// mutation goes through [`TaskRegistry::store`] / [`TaskRegistry::update`]
/// (or the engine's internal guarded transitions).
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Task>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Task>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the entry for `task.id`.
    pub fn store(&self, task: Task) {
        tracing::debug!(target: TRACING_TARGET, task_id = %task.id, "task stored");
        self.write().insert(task.id.clone(), task);
    }

    /// Returns a snapshot of the task with the given id.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.read().get(id).cloned()
    }

    /// Returns a point-in-time snapshot of every task. Ordering unspecified.
    pub fn get_all(&self) -> Vec<Task> {
        self.read().values().cloned().collect()
    }

    /// Returns a snapshot of every task currently in `status`.
    pub fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.read()
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect()
    }

    /// Replaces the state of an already-present id. Same as [`store`].
    ///
    /// [`store`]: TaskRegistry::store
    pub fn update(&self, task: Task) {
        tracing::debug!(target: TRACING_TARGET, task_id = %task.id, "task updated");
        self.write().insert(task.id.clone(), task);
    }

    /// Removes the entry for `id`, if present.
    pub fn delete(&self, id: &str) {
        tracing::debug!(target: TRACING_TARGET, task_id = %id, "task deleted");
        self.write().remove(id);
    }

    /// Removes every terminal task whose `completed_at` is strictly before
    /// `before`. Returns the number removed.
    pub fn cleanup_completed(&self, before: DateTime<Utc>) -> usize {
        let mut tasks = self.write();
        let initial = tasks.len();
        tasks.retain(|_, task| {
            !(task.status.is_terminal()
                && task.completed_at.is_some_and(|done| done < before))
        });
        let removed = initial - tasks.len();
        drop(tasks);

        if removed > 0 {
            tracing::info!(target: TRACING_TARGET, count = removed, "cleaned up completed tasks");
        }
        removed
    }

    /// Task counts partitioned by status.
    pub fn stats(&self) -> HashMap<TaskStatus, usize> {
        let mut stats = HashMap::new();
        for task in self.read().values() {
            *stats.entry(task.status).or_insert(0) += 1;
        }
        stats
    }

    /// Number of tasks currently indexed.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Mutates the entry for `id` under the write lock.
    ///
    /// `apply` returns whether its changes should be kept; on `false` the
    /// entry is left untouched. Returns `None` when the id is unknown,
    /// otherwise the post-call snapshot and whether the mutation was applied.
    /// State transitions go through this so a task can never be moved out of
    /// a terminal state by a racing writer.
    pub(crate) fn modify<F>(&self, id: &str, apply: F) -> Option<(Task, bool)>
    where
        F: FnOnce(&mut Task) -> bool,
    {
        let mut tasks = self.write();
        let entry = tasks.get_mut(id)?;
        let mut candidate = entry.clone();
        let applied = apply(&mut candidate);
        if applied {
            *entry = candidate.clone();
        } else {
            candidate = entry.clone();
        }
        Some((candidate, applied))
    }
}
