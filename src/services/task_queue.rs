use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{Task, TaskKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub individual: usize,
    pub batch: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.individual + self.batch
    }
}

#[derive(Default)]
struct Queues {
    individual: VecDeque<Task>,
    batch: VecDeque<Task>,
    queued_batches: HashSet<i64>,
}

/// Two FIFO queues with strict priority: individual analyses always drain
/// before batch comparisons. The lock is only held for O(1) operations.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Queues>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the queue for its kind. Returns `false` if a task for
    /// the same batch is already waiting.
    pub fn enqueue(&self, task: Task) -> bool {
        let mut queues = self.inner.lock();
        match task.kind() {
            TaskKind::Individual => queues.individual.push_back(task),
            TaskKind::BatchComparison => {
                if let Some(batch_id) = task.batch_id() {
                    if !queues.queued_batches.insert(batch_id) {
                        return false;
                    }
                }
                queues.batch.push_back(task);
            }
        }
        true
    }

    /// Next task, individual first. Never blocks.
    pub fn dequeue(&self) -> Option<Task> {
        let mut queues = self.inner.lock();
        if let Some(task) = queues.individual.pop_front() {
            return Some(task);
        }
        let task = queues.batch.pop_front()?;
        if let Some(batch_id) = task.batch_id() {
            queues.queued_batches.remove(&batch_id);
        }
        Some(task)
    }

    pub fn depths(&self) -> QueueDepths {
        let queues = self.inner.lock();
        QueueDepths {
            individual: queues.individual.len(),
            batch: queues.batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        let queues = self.inner.lock();
        queues.individual.is_empty() && queues.batch.is_empty()
    }

    pub fn contains_batch(&self, batch_id: i64) -> bool {
        self.inner.lock().queued_batches.contains(&batch_id)
    }
}
