//! The worker pool: bounded job queue, free-worker queue, dispatcher, and
//! auto-scaler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::{TaskConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::registry::TaskRegistry;
use crate::task::TaskUpdate;
use crate::worker::{JobWrapper, WorkerContext, WorkerSlot, publish_update, run_worker};

const TRACING_TARGET: &str = "taskforge_engine::pool";

/// Capacity of the update channel; overflow drops with a warning.
const UPDATE_CHANNEL_CAPACITY: usize = 100;
/// Workers added per auto-scaler check, at most.
const SCALE_UP_STEP: usize = 5;
/// Workers removed per auto-scaler check, at most.
const SCALE_DOWN_STEP: usize = 2;

struct WorkerHandle {
    cancel: CancellationToken,
    busy: Arc<AtomicBool>,
}

/// Owns the job queue, the set of workers, the dispatcher, and the
/// auto-scaler.
pub struct WorkerPool {
    cfg: WorkerConfig,
    registry: Arc<TaskRegistry>,
    job_tx: mpsc::Sender<JobWrapper>,
    free_tx: mpsc::Sender<WorkerSlot>,
    update_tx: mpsc::Sender<TaskUpdate>,
    update_rx: Mutex<Option<mpsc::Receiver<TaskUpdate>>>,
    dispatch_rx: Mutex<Option<(mpsc::Receiver<JobWrapper>, mpsc::Receiver<WorkerSlot>)>>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Creates a stopped pool; call [`start`](WorkerPool::start) to run it.
    pub fn new(cfg: WorkerConfig, task_cfg: &TaskConfig, registry: Arc<TaskRegistry>) -> Self {
        let (job_tx, job_rx) = mpsc::channel(task_cfg.queue_capacity);
        let (free_tx, free_rx) = mpsc::channel(cfg.max_workers);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            cfg,
            registry,
            job_tx,
            free_tx,
            update_tx,
            update_rx: Mutex::new(Some(update_rx)),
            dispatch_rx: Mutex::new(Some((job_rx, free_rx))),
            workers: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the initial workers, the dispatcher, and (when enabled) the
    /// auto-scaler.
    pub fn start(self: Arc<Self>) {
        let Some((job_rx, free_rx)) = lock(&self.dispatch_rx).take() else {
            tracing::warn!(target: TRACING_TARGET, "worker pool already started");
            return;
        };

        for _ in 0..self.cfg.min_workers {
            self.add_worker();
        }

        self.tracker.spawn(dispatch(job_rx, free_rx, self.cancel.clone()));
        if self.cfg.enable_auto_scaling {
            self.tracker.spawn(autoscale(Arc::clone(&self)));
        }

        tracing::info!(
            target: TRACING_TARGET,
            min_workers = self.cfg.min_workers,
            max_workers = self.cfg.max_workers,
            initial_workers = self.cfg.min_workers,
            "worker pool started"
        );
    }

    /// Enqueues a job; fails immediately when the queue is at capacity.
    pub(crate) fn submit(&self, wrapper: JobWrapper) -> Result<()> {
        use mpsc::error::TrySendError;

        match self.job_tx.try_send(wrapper) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Closed(_)) => Err(Error::PoolStopped),
        }
    }

    /// Signals cancellation and waits up to `shutdown_timeout` for workers to
    /// finish. Survivors past the deadline are abandoned; they exit at their
    /// next cancellation check.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(target: TRACING_TARGET, "stopping worker pool");
        self.cancel.cancel();
        self.tracker.close();

        match tokio::time::timeout(self.cfg.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!(target: TRACING_TARGET, "all workers stopped gracefully");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    timeout = ?self.cfg.shutdown_timeout,
                    "worker pool shutdown timeout"
                );
                Err(Error::ShutdownTimeout(self.cfg.shutdown_timeout))
            }
        }
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Number of jobs waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.job_tx.max_capacity() - self.job_tx.capacity()
    }

    /// Configured queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.job_tx.max_capacity()
    }

    /// Queue length divided by capacity; the auto-scaler's control signal.
    pub fn queue_usage(&self) -> f64 {
        self.queue_len() as f64 / self.queue_capacity() as f64
    }

    /// Takes the receiving end of the update channel. Yields `Some` exactly
    /// once.
    pub fn take_update_receiver(&self) -> Option<mpsc::Receiver<TaskUpdate>> {
        lock(&self.update_rx).take()
    }

    /// Publishes an update, dropping it with a warning when the channel is
    /// full.
    pub(crate) fn publish_update(&self, update: TaskUpdate) {
        publish_update(&self.update_tx, update);
    }

    /// A fresh per-job cancellation token, parented to the pool's own signal.
    pub(crate) fn job_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    fn add_worker(&self) -> bool {
        let id = format!("worker-{}", Uuid::new_v4());
        let cancel = self.cancel.child_token();
        let busy = Arc::new(AtomicBool::new(false));
        {
            let mut workers = lock(&self.workers);
            if workers.len() >= self.cfg.max_workers {
                return false;
            }
            workers.insert(
                id.clone(),
                WorkerHandle {
                    cancel: cancel.clone(),
                    busy: Arc::clone(&busy),
                },
            );
        }

        let ctx = WorkerContext {
            registry: Arc::clone(&self.registry),
            free_tx: self.free_tx.clone(),
            update_tx: self.update_tx.clone(),
        };
        self.tracker.spawn(run_worker(id.clone(), ctx, cancel, busy));

        tracing::info!(target: TRACING_TARGET, worker_id = %id, "worker started");
        true
    }

    fn remove_workers(&self, count: usize) -> usize {
        let mut workers = lock(&self.workers);
        let floor = self.cfg.min_workers;
        let removable = workers.len().saturating_sub(floor).min(count);
        if removable == 0 {
            return 0;
        }

        // Idle workers go first; a busy worker finishes its current job
        // before honoring the cancellation, so no job is lost either way.
        let mut victims: Vec<String> = workers
            .iter()
            .filter(|(_, handle)| !handle.busy.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .take(removable)
            .collect();
        if victims.len() < removable {
            let missing = removable - victims.len();
            let extra: Vec<String> = workers
                .keys()
                .filter(|id| !victims.contains(id))
                .take(missing)
                .cloned()
                .collect();
            victims.extend(extra);
        }

        for id in &victims {
            if let Some(handle) = workers.remove(id) {
                handle.cancel.cancel();
                tracing::info!(target: TRACING_TARGET, worker_id = %id, "worker removed");
            }
        }
        victims.len()
    }

    /// One auto-scaler decision: compare queue usage against the thresholds
    /// and adjust the worker count within `[min_workers, max_workers]`.
    pub(crate) fn check_and_scale(&self) {
        let usage = self.queue_usage();
        let current = self.worker_count();

        tracing::debug!(
            target: TRACING_TARGET,
            current_workers = current,
            queue_len = self.queue_len(),
            queue_usage = usage,
            "autoscale check"
        );

        if usage > self.cfg.scale_up_threshold && current < self.cfg.max_workers {
            let target = (self.cfg.max_workers - current).min(SCALE_UP_STEP);
            let mut added = 0;
            for _ in 0..target {
                if self.add_worker() {
                    added += 1;
                }
            }
            if added > 0 {
                tracing::info!(
                    target: TRACING_TARGET,
                    added,
                    total = self.worker_count(),
                    "scaled up workers"
                );
            }
        } else if usage < self.cfg.scale_down_threshold && current > self.cfg.min_workers {
            let removed = self.remove_workers((current - self.cfg.min_workers).min(SCALE_DOWN_STEP));
            if removed > 0 {
                tracing::info!(
                    target: TRACING_TARGET,
                    removed,
                    total = self.worker_count(),
                    "scaled down workers"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The dispatcher: pull a job, then suspend until an idle worker slot is
/// available, then hand the job over. Stale slots left behind by removed
/// workers are discarded. Jobs are never re-queued or dropped.
async fn dispatch(
    mut job_rx: mpsc::Receiver<JobWrapper>,
    mut free_rx: mpsc::Receiver<WorkerSlot>,
    cancel: CancellationToken,
) {
    use mpsc::error::TrySendError;

    loop {
        let mut wrapper = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = job_rx.recv() => match job {
                Some(wrapper) => wrapper,
                None => break,
            },
        };

        loop {
            let slot = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                slot = free_rx.recv() => match slot {
                    Some(slot) => slot,
                    None => return,
                },
            };

            match slot.tx.try_send(wrapper) {
                Ok(()) => {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        worker_id = %slot.worker_id,
                        "task dispatched to worker"
                    );
                    break;
                }
                Err(TrySendError::Full(returned) | TrySendError::Closed(returned)) => {
                    // Worker gone or re-dispatched slot; keep the job and
                    // wait for the next idle worker.
                    tracing::debug!(
                        target: TRACING_TARGET,
                        worker_id = %slot.worker_id,
                        "discarding stale worker slot"
                    );
                    wrapper = returned;
                }
            }
        }
    }

    tracing::info!(target: TRACING_TARGET, "dispatcher stopping");
}

/// The auto-scaler loop: wake every `scale_check_interval`, decide, repeat.
async fn autoscale(pool: Arc<WorkerPool>) {
    let period = pool.cfg.scale_check_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = pool.cancel.cancelled() => break,
            _ = ticker.tick() => pool.check_and_scale(),
        }
    }

    tracing::info!(target: TRACING_TARGET, "autoscaler stopping");
}
