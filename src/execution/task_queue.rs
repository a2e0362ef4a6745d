//! Bounded FIFO task queue with admission control.
//!
//! The queue is the hand-off point between the job's feeder and its workers:
//! tasks leave in insertion order and each task is visible to exactly one
//! worker. Capacity is fixed; `try_enqueue` rejects when full (backpressure)
//! and `enqueue` waits for room.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::execution::cancellation::CancellationToken;
use crate::models::Task;

/// Why a dequeue attempt returned without a task.
#[derive(Debug)]
pub enum Dequeued {
    /// Exclusive ownership of one task.
    Task(Box<Task>),
    /// No task arrived within the timeout; the caller should re-check the
    /// cancellation flag and poll again.
    TimedOut,
    /// The queue is closed and drained; no more tasks will arrive.
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("queue is closed")]
    Closed,
}

/// Lift admission failures into the crate taxonomy, so callers doing their
/// own submission via `try_enqueue` can use `?` against `BatchError`.
impl From<QueueError> for crate::error::BatchError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { capacity } => crate::error::BatchError::QueueFull { capacity },
            QueueError::Closed => {
                crate::error::BatchError::InputValidation("task queue is closed".to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// Bounded, thread-safe holder of pending work units for one job.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    item_available: Notify,
    space_available: Notify,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity,
            item_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    /// Non-blocking admission: rejects with `QueueError::Full` at capacity.
    pub fn try_enqueue(&self, task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.tasks.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        inner.tasks.push_back(task);
        drop(inner);
        self.item_available.notify_one();
        Ok(())
    }

    /// Enqueue, waiting for room when the queue is at capacity.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        loop {
            let notified = self.space_available.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.tasks.len() < self.capacity {
                    inner.tasks.push_back(task);
                    drop(inner);
                    self.item_available.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Enqueue, waiting for room, unless the cancellation flag fires first.
    ///
    /// The task is handed back on cancellation or close so the caller can
    /// mark it cancelled instead of losing it.
    pub async fn enqueue_unless_cancelled(
        &self,
        task: Task,
        cancellation: &CancellationToken,
    ) -> Result<(), Box<Task>> {
        loop {
            let notified = self.space_available.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(Box::new(task));
                }
                if inner.tasks.len() < self.capacity {
                    inner.tasks.push_back(task);
                    drop(inner);
                    self.item_available.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                () = notified => {}
                () = cancellation.cancelled() => return Err(Box::new(task)),
            }
        }
    }

    /// Dequeue the oldest task, waiting up to `timeout` for one to arrive.
    pub async fn dequeue(&self, timeout: Duration) -> Dequeued {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.item_available.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(task) = inner.tasks.pop_front() {
                    drop(inner);
                    self.space_available.notify_one();
                    return Dequeued::Task(Box::new(task));
                }
                if inner.closed {
                    return Dequeued::Closed;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Dequeued::TimedOut;
            }
        }
    }

    /// Remove and return every queued task, e.g. to mark them cancelled.
    pub fn drain(&self) -> Vec<Task> {
        let mut inner = self.inner.lock();
        let drained: Vec<Task> = inner.tasks.drain(..).collect();
        drop(inner);
        if !drained.is_empty() {
            self.space_available.notify_waiters();
        }
        drained
    }

    /// Close the queue: pending tasks can still be dequeued or drained, but
    /// no new tasks are admitted.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.item_available.notify_waiters();
        self.space_available.notify_waiters();
    }
}
