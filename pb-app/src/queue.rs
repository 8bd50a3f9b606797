use chrono::{DateTime, Utc};
use pb_channels::UserId;
use pb_render::RenderConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One render job waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub owner: UserId,
    pub image_path: PathBuf,
    pub config: RenderConfig,
    pub enqueued_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(owner: UserId, image_path: impl Into<PathBuf>, config: RenderConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            image_path: image_path.into(),
            config,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO of pending operations shared by the dispatcher and the worker.
///
/// Positions are 1-based. The worker only removes the front after it is
/// done with it, so an operation being rendered still reports position 1.
#[derive(Debug, Default)]
pub struct OperationQueue {
    items: Mutex<VecDeque<Operation>>,
    pushed: Notify,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Operation>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `op` and return its position.
    pub fn enqueue(&self, op: Operation) -> usize {
        let position = {
            let mut items = self.lock();
            items.push_back(op);
            items.len()
        };
        self.pushed.notify_one();
        position
    }

    pub fn peek(&self) -> Option<Operation> {
        self.lock().front().cloned()
    }

    pub fn dequeue(&self) -> Option<Operation> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count_for_owner(&self, owner: UserId) -> usize {
        self.lock().iter().filter(|op| op.owner == owner).count()
    }

    /// Every operation of `owner` with its current position.
    pub fn operations_for_owner(&self, owner: UserId) -> Vec<(usize, Operation)> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, op)| op.owner == owner)
            .map(|(i, op)| (i + 1, op.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        self.lock().iter().cloned().collect()
    }

    /// Wait until the queue has a front element and return a copy of it.
    /// Returns `None` once `shutdown` is cancelled.
    pub async fn next_pending(&self, shutdown: &CancellationToken) -> Option<Operation> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            if let Some(op) = self.peek() {
                return Some(op);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.pushed.notified() => {}
            }
        }
    }
}
