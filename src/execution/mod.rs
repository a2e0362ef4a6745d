//! Task execution: bounded queueing, worker loops, retry backoff, and
//! cooperative cancellation.

pub mod backoff;
pub mod cancellation;
pub mod task_queue;
pub mod worker_pool;

pub use backoff::{BackoffPolicy, RetryState};
pub use cancellation::CancellationToken;
pub use task_queue::{Dequeued, QueueError, TaskQueue};
pub use worker_pool::{WorkerContext, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
