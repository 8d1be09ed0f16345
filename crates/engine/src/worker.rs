//! A single execution unit of the pool.
//!
//! Each worker owns a single-slot inbound channel. The sender half, tagged
//! with the worker id, is re-published to the pool's free-worker queue after
//! every job, so the dispatcher always hands work to an idle worker.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::{JobContext, TaskExecutor};
use crate::registry::TaskRegistry;
use crate::task::{TaskStatus, TaskUpdate};

const TRACING_TARGET: &str = "taskforge_engine::worker";

/// A queued job: the task id plus everything needed to run it.
pub(crate) struct JobWrapper {
    pub(crate) task_id: String,
    pub(crate) executor: TaskExecutor,
    pub(crate) cancel: CancellationToken,
    pub(crate) timeout: Duration,
}

/// An idle worker's inbound slot, as published to the free-worker queue.
///
/// Carrying the worker id with the slot lets the dispatcher log which worker
/// a job went to.
pub(crate) struct WorkerSlot {
    pub(crate) worker_id: String,
    pub(crate) tx: mpsc::Sender<JobWrapper>,
}

/// Shared pool handles a worker needs while running.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) free_tx: mpsc::Sender<WorkerSlot>,
    pub(crate) update_tx: mpsc::Sender<TaskUpdate>,
}

/// Publishes a task update, dropping it with a warning when the channel is
/// full. Registry state stays authoritative either way.
pub(crate) fn publish_update(update_tx: &mpsc::Sender<TaskUpdate>, update: TaskUpdate) {
    use mpsc::error::TrySendError;

    match update_tx.try_send(update) {
        Ok(()) => {}
        Err(TrySendError::Full(update)) => {
            tracing::warn!(
                target: TRACING_TARGET,
                task_id = %update.task_id,
                "update channel full, dropping update"
            );
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(target: TRACING_TARGET, "update channel closed, dropping update");
        }
    }
}

/// The worker loop: publish the slot, wait for a job, run it, repeat.
///
/// Cancellation exits an idle worker immediately; a busy worker finishes its
/// current job first.
pub(crate) async fn run_worker(
    id: String,
    ctx: WorkerContext,
    cancel: CancellationToken,
    busy: Arc<AtomicBool>,
) {
    let (slot_tx, mut inbox) = mpsc::channel::<JobWrapper>(1);

    loop {
        let slot = WorkerSlot {
            worker_id: id.clone(),
            tx: slot_tx.clone(),
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = ctx.free_tx.send(slot) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        // Inbox is polled first so a job handed over concurrently with
        // cancellation is still executed rather than lost.
        let wrapper = tokio::select! {
            biased;
            job = inbox.recv() => match job {
                Some(wrapper) => wrapper,
                None => break,
            },
            () = cancel.cancelled() => break,
        };

        busy.store(true, Ordering::SeqCst);
        process_job(&id, &ctx, wrapper).await;
        busy.store(false, Ordering::SeqCst);

        if cancel.is_cancelled() {
            break;
        }
    }

    tracing::info!(target: TRACING_TARGET, worker_id = %id, "worker stopping");
}

async fn process_job(worker_id: &str, ctx: &WorkerContext, wrapper: JobWrapper) {
    let JobWrapper {
        task_id,
        executor,
        cancel,
        timeout,
    } = wrapper;

    if cancel.is_cancelled() {
        tracing::debug!(
            target: TRACING_TARGET,
            worker_id,
            task_id = %task_id,
            "job cancelled before execution"
        );
        return;
    }

    let Some((task, started)) = ctx.registry.modify(&task_id, |task| {
        if task.status.is_terminal() {
            return false;
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        true
    }) else {
        tracing::debug!(target: TRACING_TARGET, task_id = %task_id, "task no longer registered");
        return;
    };
    if !started {
        tracing::debug!(
            target: TRACING_TARGET,
            task_id = %task_id,
            status = %task.status,
            "task already terminal, skipping execution"
        );
        return;
    }
    publish_update(&ctx.update_tx, TaskUpdate::from_task(&task));

    let job_ctx = JobContext::new(
        task_id.clone(),
        task.payload.clone(),
        cancel.clone(),
        Arc::clone(&ctx.registry),
        ctx.update_tx.clone(),
    );

    let outcome = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(executor(job_ctx)).catch_unwind(),
    )
    .await;

    let verdict = match outcome {
        Err(_elapsed) => Err(format!("task timed out after {timeout:?}")),
        Ok(Err(panic)) => {
            let message = panic_message(panic);
            tracing::error!(
                target: TRACING_TARGET,
                worker_id,
                task_id = %task_id,
                panic = %message,
                "executor panicked"
            );
            Err(format!("executor panicked: {message}"))
        }
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(format!("{err:#}")),
    };

    let Some((task, applied)) = ctx.registry.modify(&task_id, |task| {
        if task.status.is_terminal() {
            return false;
        }
        match &verdict {
            Ok(value) => {
                task.status = TaskStatus::Completed;
                task.result = Some(value.clone());
            }
            Err(message) => {
                task.status = TaskStatus::Failed;
                task.error = Some(message.clone());
            }
        }
        task.completed_at = Some(Utc::now());
        true
    }) else {
        return;
    };

    if applied {
        publish_update(&ctx.update_tx, TaskUpdate::from_task(&task));
        tracing::debug!(
            target: TRACING_TARGET,
            worker_id,
            task_id = %task_id,
            status = %task.status,
            "task finished"
        );
    } else {
        // Cancelled while the executor was running; the terminal state
        // recorded by the cancel stands.
        tracing::debug!(
            target: TRACING_TARGET,
            task_id = %task_id,
            status = %task.status,
            "task reached terminal state during execution"
        );
    }

    // Job completion ends the per-job cancellation context.
    cancel.cancel();
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
