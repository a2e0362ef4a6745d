//! # Job Manager
//!
//! The façade through which front ends drive the batch engine: job creation,
//! start, status, cancellation, reporting, resume, and retention cleanup.
//!
//! ## Overview
//!
//! A `JobManager` owns an [`OperationRegistry`] of handlers, a
//! [`CheckpointStore`] for durable job records and checkpoints, and an
//! in-process [`JobStore`] of live jobs. Each started job gets its own bounded
//! queue, worker pool, progress tracker, and checkpoint writer; a supervisor
//! task feeds the queue, joins the pool, and finalizes the job record.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docbatch_core::checkpoint::FileCheckpointStore;
//! use docbatch_core::config::BatchConfig;
//! use docbatch_core::manager::JobManager;
//! use docbatch_core::registry::OperationRegistry;
//! use std::sync::Arc;
//!
//! # async fn example(registry: OperationRegistry) -> docbatch_core::error::Result<()> {
//! let store = Arc::new(FileCheckpointStore::new("/var/lib/docbatch"));
//! let manager = JobManager::new(registry, store);
//!
//! let job_id = manager
//!     .create_job(
//!         "extract_text",
//!         vec!["a.pdf".to_string(), "b.pdf".to_string()],
//!         serde_json::Value::Null,
//!         BatchConfig::default(),
//!     )
//!     .await?;
//! manager.start_job(job_id).await?;
//! manager.await_completion(job_id).await?;
//! let report = manager.get_report(job_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod job_store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, CheckpointWriter};
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::execution::{
    CancellationToken, TaskQueue, WorkerContext, WorkerPool, WorkerPoolConfig,
};
use crate::logging::log_job_operation;
use crate::models::{
    BatchJob, JobCounters, JobReport, JobState, JobStatistics, Task, TaskOutcome,
};
use crate::progress::{ProgressEvent, ProgressPublisher, ProgressSnapshot, ProgressTracker};
use crate::registry::{OperationHandler, OperationRegistry};

pub use job_store::{JobHandle, JobStore, RunHandles};

/// Non-blocking view of a job's state and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub operation: String,
    pub state: JobState,
    pub counters: JobCounters,
    pub cancellation_requested: bool,
    /// Live progress snapshot, present while a run is active.
    pub progress: Option<ProgressSnapshot>,
}

/// Owns job lifecycle from creation through retention cleanup.
pub struct JobManager {
    registry: OperationRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    jobs: JobStore,
    publisher: ProgressPublisher,
}

impl JobManager {
    pub fn new(registry: OperationRegistry, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            registry,
            checkpoints,
            jobs: JobStore::new(),
            publisher: ProgressPublisher::default(),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Subscribe to progress events for every job this manager runs.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.publisher.subscribe()
    }

    /// Operation names currently registered, sorted.
    pub async fn supported_operations(&self) -> Vec<String> {
        self.registry.supported_operations().await
    }

    /// Validate and record a new job. The job is `Pending` until started;
    /// inputs are never opened here.
    pub async fn create_job(
        &self,
        operation: impl Into<String>,
        inputs: Vec<String>,
        params: Value,
        config: BatchConfig,
    ) -> Result<Uuid> {
        let operation = operation.into();
        config.validate()?;

        if inputs.is_empty() {
            return Err(BatchError::InputValidation(
                "inputs must not be empty".to_string(),
            ));
        }
        if let Some(index) = inputs.iter().position(|input| input.trim().is_empty()) {
            return Err(BatchError::InputValidation(format!(
                "input reference at index {index} is blank"
            )));
        }
        if !self.registry.contains(&operation).await {
            return Err(BatchError::InputValidation(format!(
                "unknown operation: {operation}"
            )));
        }

        let job = BatchJob::new(operation.clone(), inputs, params, config);
        let job_id = job.job_id;
        self.checkpoints.save_job(&job).await?;
        self.jobs.insert(Arc::new(JobHandle::new(job)));

        log_job_operation("create_job", job_id, Some(&operation), "pending", None);
        Ok(job_id)
    }

    /// Materialize tasks and launch the worker pool for a `Pending` job.
    pub async fn start_job(&self, job_id: Uuid) -> Result<()> {
        let handle = self.handle(job_id)?;

        let (tasks, operation, config) = {
            let mut job = handle.job.write();
            if job.state != JobState::Pending {
                return Err(BatchError::InputValidation(format!(
                    "job {job_id} is {} and cannot be started",
                    job.state
                )));
            }
            let tasks = job.materialize_tasks();
            job.mark_running();
            (tasks, job.operation.clone(), job.config.clone())
        };

        let handler = self.resolve_handler(&operation).await?;
        let record = handle.job.read().clone();
        self.checkpoints.save_job(&record).await?;

        self.spawn_run(handle, handler, tasks, HashSet::new(), 0, &config)
            .await;

        log_job_operation("start_job", job_id, Some(&operation), "running", None);
        Ok(())
    }

    /// Resume an interrupted job from its last checkpoint.
    ///
    /// Only the tasks absent from the checkpointed completed set are
    /// re-executed; checkpointed tasks reappear in the report as restored
    /// outcomes. At-least-once: work finished after the last flush runs again.
    pub async fn resume_job(&self, job_id: Uuid) -> Result<()> {
        let handle = match self.jobs.get(job_id) {
            Some(handle) => handle,
            // Not in memory: a prior process owned it. Reload the record.
            None => match self.checkpoints.load_job(job_id).await? {
                Some(job) => {
                    let handle = Arc::new(JobHandle::new(job));
                    self.jobs.insert(Arc::clone(&handle));
                    handle
                }
                None => return Err(BatchError::JobNotFound(job_id)),
            },
        };

        {
            let job = handle.job.read();
            if job.state.is_terminal() {
                return Err(BatchError::JobNotResumable {
                    job_id,
                    reason: format!("job is already {}", job.state),
                });
            }
            if job.tasks.is_empty() {
                return Err(BatchError::JobNotResumable {
                    job_id,
                    reason: "job was never started".to_string(),
                });
            }
        }
        if handle.run.lock().is_some() {
            return Err(BatchError::JobNotResumable {
                job_id,
                reason: "job is running in this process".to_string(),
            });
        }

        let checkpoint = self
            .checkpoints
            .load_checkpoint(job_id)
            .await?
            .ok_or_else(|| BatchError::JobNotResumable {
                job_id,
                reason: "no checkpoint recorded".to_string(),
            })?;
        let completed = checkpoint.completed_task_ids;

        let (remaining, restored_outcomes, operation, config) = {
            let mut job = handle.job.write();
            let remaining = job.materialize_remaining_tasks(&completed);
            let restored: Vec<TaskOutcome> = job
                .tasks
                .iter()
                .filter(|assignment| completed.contains(&assignment.task_id))
                .filter_map(|assignment| {
                    job.inputs.get(assignment.input_index).map(|input| {
                        TaskOutcome::restored(
                            assignment.task_id,
                            assignment.input_index,
                            input.clone(),
                        )
                    })
                })
                .collect();
            job.mark_running();
            (remaining, restored, job.operation.clone(), job.config.clone())
        };

        let handler = self.resolve_handler(&operation).await?;
        let restored_count = restored_outcomes.len() as u64;
        {
            let mut outcomes = handle.outcomes.lock();
            outcomes.clear();
            outcomes.extend(restored_outcomes);
        }
        handle.warnings.lock().clear();

        info!(
            job_id = %job_id,
            restored = restored_count,
            remaining = remaining.len(),
            "Resuming job from checkpoint"
        );
        self.spawn_run(handle, handler, remaining, completed, restored_count, &config)
            .await;

        log_job_operation("resume_job", job_id, Some(&operation), "running", None);
        Ok(())
    }

    /// Non-blocking state and counter snapshot.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatus> {
        let handle = self.handle(job_id)?;
        let job = handle.job.read();

        let progress = if job.state == JobState::Running {
            handle
                .run
                .lock()
                .as_ref()
                .map(|run| run.tracker.snapshot())
        } else {
            None
        };
        let counters = progress
            .map(|snapshot| JobCounters {
                total: snapshot.total,
                succeeded: snapshot.succeeded,
                failed: snapshot.failed,
                cancelled: snapshot.cancelled,
            })
            .unwrap_or(job.counters);

        Ok(JobStatus {
            job_id,
            operation: job.operation.clone(),
            state: job.state,
            counters,
            cancellation_requested: job.cancellation_requested,
            progress,
        })
    }

    /// Request cooperative cancellation. Idempotent; in-flight handler calls
    /// run to completion.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let handle = self.handle(job_id)?;

        match request_cancel(&handle) {
            CancelOutcome::AlreadyTerminal => return Ok(()),
            CancelOutcome::PendingCancelled => {
                let record = handle.job.read().clone();
                self.checkpoints.save_job(&record).await?;
                info!(
                    job_id = %job_id,
                    cancelled = record.counters.cancelled,
                    "Cancelled pending job"
                );
            }
            CancelOutcome::Signalled => {}
            // start_job or resume_job is mid-launch; the flag is already set
            // and spawn_run fires the token when it installs the run handles.
            CancelOutcome::Deferred => {}
        }

        log_job_operation("cancel_job", job_id, None, "cancellation_requested", None);
        Ok(())
    }

    /// Full report for a terminal job: per-task outcomes in submission order
    /// plus aggregate statistics.
    pub async fn get_report(&self, job_id: Uuid) -> Result<JobReport> {
        let handle = self.handle(job_id)?;
        let job = handle.job.read().clone();
        if !job.state.is_terminal() {
            return Err(BatchError::JobNotTerminal(job_id));
        }
        let outcomes = handle.outcomes.lock().clone();
        let warnings = handle.warnings.lock().clone();
        Ok(JobReport::compile(&job, outcomes, warnings))
    }

    /// Aggregate statistics for a terminal job.
    pub async fn job_statistics(&self, job_id: Uuid) -> Result<JobStatistics> {
        Ok(self.get_report(job_id).await?.statistics)
    }

    /// Create a new `Pending` job covering exactly the failed inputs of a
    /// terminal job, with the same operation, params, and config.
    pub async fn retry_failed(&self, job_id: Uuid) -> Result<Uuid> {
        let report = self.get_report(job_id).await?;
        let failed = report.failed_inputs();
        if failed.is_empty() {
            return Err(BatchError::InputValidation(format!(
                "job {job_id} has no failed tasks to retry"
            )));
        }

        let (params, config) = {
            let handle = self.handle(job_id)?;
            let job = handle.job.read();
            (job.params.clone(), job.config.clone())
        };
        let retry_id = self
            .create_job(report.operation, failed, params, config)
            .await?;
        info!(job_id = %job_id, retry_job_id = %retry_id, "Created retry job for failed inputs");
        Ok(retry_id)
    }

    /// Drop terminal jobs whose completion is older than `max_age`, removing
    /// their persisted records and checkpoints. Returns the number removed.
    pub async fn cleanup_expired_jobs(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now() - max_age;
        let mut removed = 0;

        for handle in self.jobs.all() {
            let (job_id, expired) = {
                let job = handle.job.read();
                let expired = job.state.is_terminal()
                    && job.completed_at.map(|at| at < cutoff).unwrap_or(false);
                (job.job_id, expired)
            };
            if expired {
                self.jobs.remove(job_id);
                self.checkpoints.delete(job_id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up expired jobs");
        }
        Ok(removed)
    }

    /// Block until the job reaches a terminal state.
    pub async fn await_completion(&self, job_id: Uuid) -> Result<()> {
        let handle = self.handle(job_id)?;
        loop {
            if handle.job.read().state.is_terminal() {
                return Ok(());
            }
            if let Some(supervisor) = handle.take_supervisor() {
                if let Err(err) = supervisor.await {
                    error!(job_id = %job_id, error = %err, "Job supervisor panicked");
                }
                continue;
            }
            // Another caller holds the supervisor handle; poll.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Cancel every non-terminal job, pending ones included, and wait for
    /// their pools to wind down.
    pub async fn shutdown(&self) {
        let handles = self.jobs.all();
        for handle in &handles {
            if let CancelOutcome::PendingCancelled = request_cancel(handle) {
                let record = handle.job.read().clone();
                if let Err(err) = self.checkpoints.save_job(&record).await {
                    warn!(
                        job_id = %record.job_id,
                        error = %err,
                        "Failed to persist cancelled job during shutdown"
                    );
                }
            }
        }
        for handle in handles {
            if let Some(supervisor) = handle.take_supervisor() {
                if let Err(err) = supervisor.await {
                    error!(error = %err, "Job supervisor panicked during shutdown");
                }
            }
        }
        info!("Job manager shut down");
    }

    fn handle(&self, job_id: Uuid) -> Result<Arc<JobHandle>> {
        self.jobs.get(job_id).ok_or(BatchError::JobNotFound(job_id))
    }

    async fn resolve_handler(&self, operation: &str) -> Result<Arc<dyn OperationHandler>> {
        self.registry.resolve(operation).await.ok_or_else(|| {
            BatchError::InputValidation(format!("unknown operation: {operation}"))
        })
    }

    /// Wire up queue, tracker, checkpoint writer, and worker pool for one run
    /// and hand the rest of the lifecycle to a supervisor task.
    async fn spawn_run(
        &self,
        handle: Arc<JobHandle>,
        handler: Arc<dyn OperationHandler>,
        tasks: Vec<Task>,
        checkpoint_seed: HashSet<Uuid>,
        restored_count: u64,
        config: &BatchConfig,
    ) {
        let (job_id, operation, params, total) = {
            let job = handle.job.read();
            (
                job.job_id,
                job.operation.clone(),
                job.params.clone(),
                job.counters.total,
            )
        };

        let queue = Arc::new(TaskQueue::new(config.queue_capacity));
        let tracker = Arc::new(ProgressTracker::new(
            job_id,
            total,
            self.publisher.clone(),
            config.progress_event_interval(),
        ));
        if restored_count > 0 {
            tracker.record_restored(restored_count);
        }
        let cancellation = CancellationToken::new();
        let aborted = Arc::new(AtomicBool::new(false));

        let (completions, writer) = CheckpointWriter::spawn(
            Arc::clone(&self.checkpoints),
            job_id,
            checkpoint_seed,
            config.checkpoint_interval_tasks,
            config.checkpoint_interval(),
        );

        let output_template = params
            .get("output_template")
            .and_then(Value::as_str)
            .map(String::from);

        let ctx = Arc::new(WorkerContext {
            job_id,
            operation,
            queue: Arc::clone(&queue),
            handler,
            output_template,
            tracker: Arc::clone(&tracker),
            cancellation: cancellation.clone(),
            outcomes: Arc::clone(&handle.outcomes),
            job_warnings: Arc::clone(&handle.warnings),
            completions,
            aborted: Arc::clone(&aborted),
            config: WorkerPoolConfig::from_batch_config(config),
        });
        let pool = WorkerPool::spawn(ctx);

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&handle),
            Arc::clone(&self.checkpoints),
            queue,
            tasks,
            cancellation.clone(),
            aborted,
            Arc::clone(&tracker),
            pool,
            writer,
        ));

        *handle.run.lock() = Some(RunHandles {
            tracker,
            cancellation: cancellation.clone(),
            supervisor: Some(supervisor),
        });

        // A cancel request may have landed after the state transition but
        // before the run handles existed; it set the flag and found no token,
        // so honor it here.
        if handle.job.read().cancellation_requested {
            cancellation.cancel();
        }
    }
}

/// How a cancellation request was resolved.
enum CancelOutcome {
    AlreadyTerminal,
    /// The job had never started; it is now terminal `Cancelled`.
    PendingCancelled,
    /// The live run's token was fired.
    Signalled,
    /// The job is between its state transition and run-handle installation;
    /// the flag is set and `spawn_run` fires the token itself.
    Deferred,
}

/// Decide and apply a cancellation in one critical section, so a concurrent
/// `start_job` either observes `Pending` before the cancel or a terminal
/// `Cancelled` after it, never a half-applied state.
fn request_cancel(handle: &JobHandle) -> CancelOutcome {
    {
        let mut job = handle.job.write();
        if job.state.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        job.cancellation_requested = true;
        if job.state == JobState::Pending {
            let counters = JobCounters {
                total: job.counters.total,
                cancelled: job.counters.total,
                ..JobCounters::default()
            };
            job.mark_terminal(JobState::Cancelled, counters);
            return CancelOutcome::PendingCancelled;
        }
    }
    match handle.cancellation() {
        Some(cancellation) => {
            cancellation.cancel();
            CancelOutcome::Signalled
        }
        None => CancelOutcome::Deferred,
    }
}

/// Feed the queue, join the pool and checkpoint writer, then finalize the
/// job record. One supervisor per run.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    handle: Arc<JobHandle>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Arc<TaskQueue>,
    tasks: Vec<Task>,
    cancellation: CancellationToken,
    aborted: Arc<AtomicBool>,
    tracker: Arc<ProgressTracker>,
    pool: WorkerPool,
    writer: CheckpointWriter,
) {
    let job_id = handle.job.read().job_id;

    let mut never_queued: Vec<Task> = Vec::new();
    let mut pending = tasks.into_iter();
    while let Some(task) = pending.next() {
        if cancellation.is_cancelled() {
            never_queued.push(task);
            never_queued.extend(pending);
            break;
        }
        if let Err(returned) = queue.enqueue_unless_cancelled(task, &cancellation).await {
            never_queued.push(*returned);
            never_queued.extend(pending);
            break;
        }
    }
    queue.close();

    for mut task in never_queued {
        task.mark_cancelled();
        tracker.task_cancelled();
        handle.outcomes.lock().push(TaskOutcome::from_task(&task));
    }

    let stats = pool.join().await;
    // All worker contexts are gone, so the completion sender is dropped and
    // the writer performs its final flush.
    writer.join().await;

    let final_state = if aborted.load(Ordering::SeqCst) {
        JobState::Failed
    } else if cancellation.is_cancelled() {
        JobState::Cancelled
    } else {
        JobState::Completed
    };

    {
        let mut job = handle.job.write();
        if cancellation.is_cancelled() {
            job.cancellation_requested = true;
        }
        job.mark_terminal(final_state, tracker.to_counters());
    }
    let record = handle.job.read().clone();
    if let Err(err) = checkpoints.save_job(&record).await {
        warn!(job_id = %job_id, error = %err, "Failed to persist terminal job record");
    }
    tracker.emit_now();

    info!(
        job_id = %job_id,
        state = %final_state,
        succeeded = stats.succeeded,
        failed = stats.failed,
        swept_cancelled = stats.swept_cancelled,
        "Job finished"
    );
    log_job_operation(
        "job_finished",
        job_id,
        Some(&record.operation),
        &final_state.to_string(),
        None,
    );
}
