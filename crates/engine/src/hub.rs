//! Many-to-many fan-out of task updates.
//!
//! A single coordinator task owns the subscriber set; register, unregister,
//! and broadcast all arrive as messages, so no per-subscriber locking is
//! needed. A slow subscriber never blocks the producer or its peers: when
//! its buffer fills, it is forcibly unregistered and its channel closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::task::TaskUpdate;

const TRACING_TARGET: &str = "taskforge_engine::hub";

/// Capacity of the coordinator's inbound channel; broadcasts beyond it are
/// dropped with a warning.
const BROADCAST_CAPACITY: usize = 100;
/// Per-subscriber delivery buffer.
const SUBSCRIBER_CAPACITY: usize = 256;

enum HubCommand {
    Register {
        id: u64,
        tx: mpsc::Sender<TaskUpdate>,
    },
    Unregister {
        id: u64,
    },
    Broadcast(TaskUpdate),
}

/// Handle to the update hub. Cheap to clone; all clones feed the same
/// coordinator.
#[derive(Clone)]
pub struct UpdateHub {
    cmd_tx: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    count: Arc<AtomicUsize>,
}

impl UpdateHub {
    /// Starts the coordinator task and returns a handle to it.
    pub fn start() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let count = Arc::new(AtomicUsize::new(0));
        tokio::spawn(coordinate(cmd_rx, Arc::clone(&count)));

        Self {
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            count,
        }
    }

    /// Registers a new subscriber and returns its subscription.
    pub async fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let _ = self.cmd_tx.send(HubCommand::Register { id, tx }).await;

        Subscription {
            id,
            rx,
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Removes a subscriber by id.
    pub async fn unregister(&self, id: u64) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id }).await;
    }

    /// Delivers an update to every registered subscriber's buffer. Dropped
    /// with a warning when the hub's own inbound channel is full.
    pub fn broadcast(&self, update: TaskUpdate) {
        use mpsc::error::TrySendError;

        match self.cmd_tx.try_send(HubCommand::Broadcast(update)) {
            Ok(()) => {}
            Err(TrySendError::Full(HubCommand::Broadcast(update))) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    task_id = %update.task_id,
                    "broadcast channel full, dropping message"
                );
            }
            Err(_) => {
                tracing::debug!(target: TRACING_TARGET, "hub coordinator gone, dropping message");
            }
        }
    }

    /// Current subscriber count, as last observed by the coordinator.
    pub fn subscriber_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// A registered subscriber's receiving end.
///
/// Dropping the subscription unregisters it from the hub.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<TaskUpdate>,
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl Subscription {
    /// The subscriber id assigned by the hub.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next update. `None` means the subscription was closed:
    /// either the hub shut down or this subscriber was evicted as too slow.
    pub async fn recv(&mut self) -> Option<TaskUpdate> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(HubCommand::Unregister { id: self.id });
    }
}

async fn coordinate(mut cmd_rx: mpsc::Receiver<HubCommand>, count: Arc<AtomicUsize>) {
    use mpsc::error::TrySendError;

    let mut subscribers: HashMap<u64, mpsc::Sender<TaskUpdate>> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCommand::Register { id, tx } => {
                subscribers.insert(id, tx);
                count.store(subscribers.len(), Ordering::Relaxed);
                tracing::info!(
                    target: TRACING_TARGET,
                    subscriber_id = id,
                    total_subscribers = subscribers.len(),
                    "subscriber registered"
                );
            }
            HubCommand::Unregister { id } => {
                if subscribers.remove(&id).is_some() {
                    count.store(subscribers.len(), Ordering::Relaxed);
                    tracing::info!(
                        target: TRACING_TARGET,
                        subscriber_id = id,
                        total_subscribers = subscribers.len(),
                        "subscriber unregistered"
                    );
                }
            }
            HubCommand::Broadcast(update) => {
                subscribers.retain(|id, tx| match tx.try_send(update.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            subscriber_id = *id,
                            "subscriber buffer full, disconnecting"
                        );
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(
                            target: TRACING_TARGET,
                            subscriber_id = *id,
                            "subscriber gone, removing"
                        );
                        false
                    }
                });
                count.store(subscribers.len(), Ordering::Relaxed);
            }
        }
    }

    tracing::debug!(target: TRACING_TARGET, "hub coordinator stopping");
}
