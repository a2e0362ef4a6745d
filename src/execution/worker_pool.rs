//! # Worker Pool
//!
//! A fixed number of independent execution loops pulling tasks from the
//! bounded queue and invoking the registered operation handler.
//!
//! ## Execution discipline
//!
//! - Each loop checks the cancellation flag between task executions; once the
//!   flag is observed set, the loop stops pulling work, sweeps still-queued
//!   tasks to `Cancelled`, and exits.
//! - Transient handler failures are retried with exponential backoff up to
//!   the configured attempt limit; permanent failures are recorded
//!   immediately.
//! - A handler panic is captured and treated as a permanent failure; it never
//!   terminates the worker loop.
//! - Per-task timeouts are not supported: handler invocations are opaque,
//!   non-interruptible calls and run to completion.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::CompletionSender;
use crate::config::BatchConfig;
use crate::execution::backoff::{BackoffPolicy, RetryState};
use crate::execution::cancellation::CancellationToken;
use crate::execution::task_queue::{Dequeued, TaskQueue};
use crate::models::states::TaskState;
use crate::models::task::Task;
use crate::models::TaskOutcome;
use crate::progress::ProgressTracker;
use crate::registry::handler::{
    OperationError, OperationErrorKind, OperationHandler, OperationResult,
};

/// Worker pool configuration derived from the job's `BatchConfig`.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    /// Dequeue wait per poll; bounds how stale a cancellation check can be.
    pub poll_interval: Duration,
    pub max_retry_attempts: u32,
    pub backoff: BackoffPolicy,
    pub continue_on_error: bool,
}

impl WorkerPoolConfig {
    pub fn from_batch_config(config: &BatchConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            poll_interval: Duration::from_millis(100),
            max_retry_attempts: config.max_retry_attempts,
            backoff: BackoffPolicy::from_config(config),
            continue_on_error: config.continue_on_error,
        }
    }
}

/// Everything a worker loop needs, shared across the pool.
pub struct WorkerContext {
    pub job_id: Uuid,
    pub operation: String,
    pub queue: Arc<TaskQueue>,
    pub handler: Arc<dyn OperationHandler>,
    pub output_template: Option<String>,
    pub tracker: Arc<ProgressTracker>,
    pub cancellation: CancellationToken,
    /// Terminal outcomes, collected for the job report.
    pub outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
    /// Job-level warnings (system resource pressure and the like).
    pub job_warnings: Arc<Mutex<Vec<String>>>,
    /// Succeeded task ids, fed to the checkpoint writer.
    pub completions: CompletionSender,
    /// Set when a failure aborts the job under `continue_on_error = false`.
    pub aborted: Arc<AtomicBool>,
    pub config: WorkerPoolConfig,
}

/// Aggregated statistics across all workers of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub swept_cancelled: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    processed: u64,
    succeeded: u64,
    failed: u64,
    swept_cancelled: u64,
}

/// Fixed-size set of concurrent executors for one job.
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` worker loops against the shared context.
    pub fn spawn(ctx: Arc<WorkerContext>) -> Self {
        let handles = (0..ctx.config.concurrency)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(worker_loop(worker_id, ctx))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to exit and aggregate their statistics.
    pub async fn join(self) -> WorkerPoolStats {
        let mut stats = WorkerPoolStats::default();
        for handle in self.handles {
            match handle.await {
                Ok(worker) => {
                    stats.processed += worker.processed;
                    stats.succeeded += worker.succeeded;
                    stats.failed += worker.failed;
                    stats.swept_cancelled += worker.swept_cancelled;
                }
                Err(err) => error!(error = %err, "Worker task panicked"),
            }
        }
        stats
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>) -> WorkerStats {
    debug!(worker_id, job_id = %ctx.job_id, "Worker started");
    let mut stats = WorkerStats::default();

    loop {
        if ctx.cancellation.is_cancelled() {
            sweep_cancelled(&ctx, &mut stats);
            break;
        }

        match ctx.queue.dequeue(ctx.config.poll_interval).await {
            Dequeued::Task(mut task) => {
                run_task(&ctx, &mut task, &mut stats).await;
            }
            Dequeued::TimedOut => continue,
            Dequeued::Closed => break,
        }
    }

    debug!(
        worker_id,
        job_id = %ctx.job_id,
        processed = stats.processed,
        "Worker exited"
    );
    stats
}

/// Mark every still-queued task `Cancelled` without dispatching it.
fn sweep_cancelled(ctx: &WorkerContext, stats: &mut WorkerStats) {
    for mut task in ctx.queue.drain() {
        task.mark_cancelled();
        ctx.tracker.task_cancelled();
        ctx.outcomes.lock().push(TaskOutcome::from_task(&task));
        stats.swept_cancelled += 1;
    }
}

/// Execute one task to a terminal state, applying retry policy.
async fn run_task(ctx: &WorkerContext, task: &mut Task, stats: &mut WorkerStats) {
    task.mark_running();
    ctx.tracker.task_started();
    stats.processed += 1;

    let mut retry = RetryState::new();
    loop {
        retry.record_attempt();
        task.attempts = retry.attempts;

        let result = invoke_handler(ctx, task).await;

        if result.success {
            task.mark_succeeded(result.outputs, result.warnings);
            break;
        }

        let error = result.error.unwrap_or_else(|| {
            OperationError::permanent("handler reported failure without error detail")
        });

        if error.kind == OperationErrorKind::SystemResource {
            ctx.job_warnings.lock().push(format!(
                "system resource error on {}: {}",
                task.input_ref, error.message
            ));
        }

        if !(error.is_retryable() && retry.can_retry(ctx.config.max_retry_attempts)) {
            task.mark_failed(error, result.warnings);
            break;
        }

        let delay = retry.schedule_retry(&ctx.config.backoff);
        warn!(
            job_id = %ctx.job_id,
            task_id = %task.task_id,
            attempt = retry.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error.message,
            "Transient failure, scheduling retry"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = ctx.cancellation.cancelled() => {
                // Remaining retries are abandoned; the recorded failure is
                // the last observed handler error.
                task.mark_failed(error, result.warnings);
                break;
            }
        }
    }

    record_terminal(ctx, task, stats);
}

async fn invoke_handler(ctx: &WorkerContext, task: &Task) -> OperationResult {
    let invocation = ctx.handler.execute(
        &task.input_ref,
        ctx.output_template.as_deref(),
        &task.params,
    );
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                job_id = %ctx.job_id,
                task_id = %task.task_id,
                input_ref = %task.input_ref,
                panic = %message,
                "Handler panicked; recording permanent failure"
            );
            OperationResult::failure(OperationError::permanent(format!(
                "handler panicked: {message}"
            )))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn record_terminal(ctx: &WorkerContext, task: &Task, stats: &mut WorkerStats) {
    match task.state {
        TaskState::Succeeded => {
            ctx.tracker.task_succeeded();
            stats.succeeded += 1;
            // The writer may already be gone during shutdown.
            let _ = ctx.completions.send(task.task_id);
            info!(
                job_id = %ctx.job_id,
                task_id = %task.task_id,
                operation = %ctx.operation,
                input_ref = %task.input_ref,
                attempts = task.attempts,
                "Task succeeded"
            );
        }
        TaskState::Failed => {
            ctx.tracker.task_failed();
            stats.failed += 1;
            warn!(
                job_id = %ctx.job_id,
                task_id = %task.task_id,
                operation = %ctx.operation,
                input_ref = %task.input_ref,
                attempts = task.attempts,
                "Task failed"
            );
            if !ctx.config.continue_on_error && !ctx.aborted.swap(true, Ordering::SeqCst) {
                warn!(
                    job_id = %ctx.job_id,
                    "Aborting job: continue_on_error is disabled"
                );
                ctx.cancellation.cancel();
            }
        }
        other => {
            debug_assert!(false, "task left run_task in non-terminal state {other}");
        }
    }
    ctx.outcomes.lock().push(TaskOutcome::from_task(task));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressPublisher;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    struct SucceedingHandler;

    #[async_trait]
    impl OperationHandler for SucceedingHandler {
        async fn execute(
            &self,
            input_ref: &str,
            _output_template: Option<&str>,
            _params: &Value,
        ) -> OperationResult {
            OperationResult::success(vec![format!("{input_ref}.out")])
        }
    }

    /// Fails transiently `failures` times per input, then succeeds.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OperationHandler for FlakyHandler {
        async fn execute(
            &self,
            input_ref: &str,
            _output_template: Option<&str>,
            _params: &Value,
        ) -> OperationResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                OperationResult::failure(OperationError::transient("temporary lock"))
            } else {
                OperationResult::success(vec![format!("{input_ref}.out")])
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl OperationHandler for PanickingHandler {
        async fn execute(
            &self,
            _input_ref: &str,
            _output_template: Option<&str>,
            _params: &Value,
        ) -> OperationResult {
            panic!("handler exploded");
        }
    }

    struct PermanentFailureHandler;

    #[async_trait]
    impl OperationHandler for PermanentFailureHandler {
        async fn execute(
            &self,
            _input_ref: &str,
            _output_template: Option<&str>,
            _params: &Value,
        ) -> OperationResult {
            OperationResult::failure(OperationError::permanent("corrupt input"))
        }
    }

    struct Harness {
        ctx: Arc<WorkerContext>,
        completions_rx: mpsc::UnboundedReceiver<Uuid>,
    }

    fn harness(
        handler: Arc<dyn OperationHandler>,
        inputs: usize,
        config_overrides: impl FnOnce(&mut WorkerPoolConfig),
    ) -> Harness {
        let job_id = Uuid::new_v4();
        let queue = Arc::new(TaskQueue::new(64));
        for index in 0..inputs {
            queue
                .try_enqueue(Task::new(
                    job_id,
                    index,
                    format!("input-{index}.pdf"),
                    Value::Null,
                ))
                .unwrap();
        }
        queue.close();

        let mut config = WorkerPoolConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            max_retry_attempts: 2,
            backoff: BackoffPolicy {
                base_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                jitter_enabled: false,
                max_jitter: 0.0,
            },
            continue_on_error: true,
        };
        config_overrides(&mut config);

        let (completions, completions_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(ProgressTracker::new(
            job_id,
            inputs as u64,
            ProgressPublisher::default(),
            Duration::from_millis(0),
        ));

        Harness {
            ctx: Arc::new(WorkerContext {
                job_id,
                operation: "test_op".to_string(),
                queue,
                handler,
                output_template: None,
                tracker,
                cancellation: CancellationToken::new(),
                outcomes: Arc::new(Mutex::new(Vec::new())),
                job_warnings: Arc::new(Mutex::new(Vec::new())),
                completions,
                aborted: Arc::new(AtomicBool::new(false)),
                config,
            }),
            completions_rx,
        }
    }

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let mut harness = harness(Arc::new(SucceedingHandler), 5, |_| {});
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert_eq!(stats.succeeded, 5);
        assert_eq!(stats.failed, 0);
        assert!(harness.ctx.tracker.all_terminal());

        let mut completed = HashSet::new();
        while let Ok(id) = harness.completions_rx.try_recv() {
            completed.insert(id);
        }
        assert_eq!(completed.len(), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_succeeds() {
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let harness = harness(handler, 1, |config| config.max_retry_attempts = 3);
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert_eq!(stats.succeeded, 1);
        let outcomes = harness.ctx.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].state, TaskState::Succeeded);
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_task() {
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let harness = harness(handler, 1, |config| config.max_retry_attempts = 2);
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert_eq!(stats.failed, 1);
        let outcomes = harness.ctx.outcomes.lock();
        assert_eq!(outcomes[0].state, TaskState::Failed);
        assert_eq!(outcomes[0].attempts, 3); // first attempt + 2 retries
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let harness = harness(Arc::new(PermanentFailureHandler), 1, |config| {
            config.max_retry_attempts = 5
        });
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert_eq!(stats.failed, 1);
        let outcomes = harness.ctx.outcomes.lock();
        assert_eq!(outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let harness = harness(Arc::new(PanickingHandler), 3, |_| {});
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        // Every task processed despite the panics; workers survived.
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 3);
        let outcomes = harness.ctx.outcomes.lock();
        assert!(outcomes
            .iter()
            .all(|outcome| outcome.error.as_ref().unwrap().message.contains("panicked")));
    }

    #[tokio::test]
    async fn test_abort_on_failure_cancels_pending() {
        let harness = harness(Arc::new(PermanentFailureHandler), 10, |config| {
            config.continue_on_error = false;
            config.concurrency = 1;
        });
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert!(harness.ctx.aborted.load(Ordering::SeqCst));
        assert!(stats.failed >= 1);
        assert!(stats.swept_cancelled >= 1);
        assert_eq!(
            stats.failed + stats.swept_cancelled + stats.succeeded,
            10,
            "every task must reach a terminal state"
        );
    }

    #[tokio::test]
    async fn test_cancellation_sweeps_pending_tasks() {
        let harness = harness(Arc::new(SucceedingHandler), 10, |config| {
            config.concurrency = 1;
        });
        harness.ctx.cancellation.cancel();
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        // Flag was set before the pool started: nothing may run.
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.swept_cancelled, 10);
        assert!(harness.ctx.tracker.all_terminal());
    }

    #[tokio::test]
    async fn test_system_resource_failure_raises_job_warning() {
        struct DiskFullHandler;

        #[async_trait]
        impl OperationHandler for DiskFullHandler {
            async fn execute(
                &self,
                _input_ref: &str,
                _output_template: Option<&str>,
                _params: &Value,
            ) -> OperationResult {
                OperationResult::failure(OperationError::new(
                    OperationErrorKind::SystemResource,
                    "disk full",
                ))
            }
        }

        let harness = harness(Arc::new(DiskFullHandler), 1, |_| {});
        let stats = WorkerPool::spawn(Arc::clone(&harness.ctx)).join().await;

        assert_eq!(stats.failed, 1);
        let warnings = harness.ctx.job_warnings.lock();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("disk full"));
    }
}
