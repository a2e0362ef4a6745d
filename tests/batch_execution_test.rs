//! End-to-end batch execution scenarios against the public API: success,
//! partial failure, retry, cancellation, abort-on-error, ordering, progress
//! events, and checkpoint-based resume across a simulated process restart.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docbatch_core::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use docbatch_core::config::BatchConfig;
use docbatch_core::manager::JobManager;
use docbatch_core::models::BatchJob;
use docbatch_core::registry::{
    OperationError, OperationHandler, OperationRegistry, OperationResult,
};
use docbatch_core::{JobState, TaskState};

/// Records every input it processes, succeeding unless told otherwise.
struct RecordingHandler {
    processed: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail_substring: Option<&'static str>,
}

#[async_trait]
impl OperationHandler for RecordingHandler {
    async fn execute(
        &self,
        input_ref: &str,
        _output_template: Option<&str>,
        _params: &Value,
    ) -> OperationResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.processed.lock().push(input_ref.to_string());
        match self.fail_substring {
            Some(marker) if input_ref.contains(marker) => {
                OperationResult::failure(OperationError::permanent("unreadable document"))
            }
            _ => OperationResult::success(vec![format!("{input_ref}.out")]),
        }
    }
}

impl RecordingHandler {
    fn arcs() -> (Arc<Mutex<Vec<String>>>, Arc<Self>) {
        let processed = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(Self {
            processed: Arc::clone(&processed),
            delay: Duration::ZERO,
            fail_substring: None,
        });
        (processed, handler)
    }
}

async fn manager_with(
    operation: &str,
    handler: Arc<dyn OperationHandler>,
) -> (tempfile::TempDir, JobManager) {
    let dir = tempfile::tempdir().unwrap();
    let registry = OperationRegistry::new();
    registry.register(operation, handler).await;
    let manager = JobManager::new(registry, Arc::new(FileCheckpointStore::new(dir.path())));
    (dir, manager)
}

fn quick_config() -> BatchConfig {
    BatchConfig {
        concurrency: 3,
        retry_backoff_base_ms: 1,
        retry_backoff_max_ms: 10,
        progress_event_interval_ms: 0,
        ..BatchConfig::default()
    }
}

fn inputs(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("doc-{i:03}.pdf")).collect()
}

#[tokio::test]
async fn all_tasks_succeed_and_report_is_ordered() {
    let (processed, handler) = RecordingHandler::arcs();
    let (_dir, manager) = manager_with("extract_text", handler).await;

    let job_id = manager
        .create_job("extract_text", inputs(12), Value::Null, quick_config())
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.counters.succeeded, 12);
    assert_eq!(report.counters.failed, 0);
    assert_eq!(processed.lock().len(), 12);

    // Outcomes follow submission order regardless of completion order.
    let indices: Vec<usize> = report
        .task_outcomes
        .iter()
        .map(|outcome| outcome.input_index)
        .collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(report.statistics.success_rate, 100.0);
}

#[tokio::test]
async fn permanent_failure_does_not_stop_the_job() {
    let handler = Arc::new(RecordingHandler {
        processed: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::ZERO,
        fail_substring: Some("corrupt"),
    });
    let (_dir, manager) = manager_with("compress", handler).await;

    let mut docs = inputs(6);
    docs[2] = "corrupt-file.pdf".to_string();
    let job_id = manager
        .create_job("compress", docs, Value::Null, quick_config())
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.counters.succeeded, 5);
    assert_eq!(report.counters.failed, 1);
    assert_eq!(report.failed_inputs(), vec!["corrupt-file.pdf".to_string()]);

    let failed = &report.task_outcomes[2];
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn abort_on_error_fails_the_job() {
    let handler = Arc::new(RecordingHandler {
        processed: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::from_millis(5),
        fail_substring: Some("doc-002"),
    });
    let (_dir, manager) = manager_with("compress", handler).await;

    let config = BatchConfig {
        continue_on_error: false,
        concurrency: 1,
        ..quick_config()
    };
    let job_id = manager
        .create_job("compress", inputs(10), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.counters.failed, 1);
    assert!(report.counters.cancelled >= 1, "pending work must be swept");
    assert_eq!(
        report.counters.succeeded + report.counters.failed + report.counters.cancelled,
        10
    );
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    struct FlakyHandler {
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
            if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                OperationResult::failure(OperationError::transient("resource busy"))
            } else {
                OperationResult::success(vec![format!("{input_ref}.out")])
            }
        }
    }

    let (_dir, manager) = manager_with(
        "ocr",
        Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
        }),
    )
    .await;

    let config = BatchConfig {
        max_retry_attempts: 3,
        ..quick_config()
    };
    let job_id = manager
        .create_job("ocr", inputs(1), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.counters.succeeded, 1);
    assert_eq!(report.task_outcomes[0].attempts, 3);
}

#[tokio::test]
async fn retry_exhaustion_records_failure() {
    struct AlwaysBusy;

    #[async_trait]
    impl OperationHandler for AlwaysBusy {
        async fn execute(
            &self,
            _input_ref: &str,
            _output_template: Option<&str>,
            _params: &Value,
        ) -> OperationResult {
            OperationResult::failure(OperationError::transient("resource busy"))
        }
    }

    let (_dir, manager) = manager_with("ocr", Arc::new(AlwaysBusy)).await;
    let config = BatchConfig {
        max_retry_attempts: 2,
        ..quick_config()
    };
    let job_id = manager
        .create_job("ocr", inputs(1), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.counters.failed, 1);
    assert_eq!(report.task_outcomes[0].attempts, 3);
}

#[tokio::test]
async fn cancellation_stops_new_work_and_conserves_counters() {
    let handler = Arc::new(RecordingHandler {
        processed: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::from_millis(30),
        fail_substring: None,
    });
    let (_dir, manager) = manager_with("extract_text", handler).await;

    let config = BatchConfig {
        concurrency: 1,
        queue_capacity: 4,
        ..quick_config()
    };
    let job_id = manager
        .create_job("extract_text", inputs(20), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.cancel_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    let report = manager.get_report(job_id).await.unwrap();
    assert_eq!(report.state, JobState::Cancelled);
    assert!(report.counters.succeeded >= 1, "some work ran before cancel");
    assert!(report.counters.cancelled >= 1, "pending work was swept");
    assert_eq!(
        report.counters.succeeded + report.counters.failed + report.counters.cancelled,
        20
    );
}

#[tokio::test]
async fn cancel_racing_start_is_never_lost_and_never_unwound() {
    // Whichever side wins, the job must settle in exactly one terminal state
    // with conserved counters: either the cancel lands first and the start is
    // refused, or the run launches and the cancel stops it.
    for _ in 0..10 {
        let handler = Arc::new(RecordingHandler {
            processed: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(20),
            fail_substring: None,
        });
        let (_dir, manager) = manager_with("extract_text", handler).await;

        let config = BatchConfig {
            concurrency: 1,
            ..quick_config()
        };
        let job_id = manager
            .create_job("extract_text", inputs(6), Value::Null, config)
            .await
            .unwrap();

        let (started, cancelled) =
            tokio::join!(manager.start_job(job_id), manager.cancel_job(job_id));
        cancelled.unwrap();

        if started.is_ok() {
            manager.await_completion(job_id).await.unwrap();
        }

        let status = manager.get_status(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled, "cancel signal was lost");
        assert!(status.cancellation_requested);
        assert_eq!(
            status.counters.succeeded + status.counters.failed + status.counters.cancelled,
            6
        );

        // Terminal state must be stable: nothing may overwrite it later.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let again = manager.get_status(job_id).await.unwrap();
        assert_eq!(again.state, JobState::Cancelled);
    }
}

#[tokio::test]
async fn single_worker_preserves_submission_order() {
    let (processed, handler) = RecordingHandler::arcs();
    let (_dir, manager) = manager_with("extract_text", handler).await;

    let config = BatchConfig {
        concurrency: 1,
        ..quick_config()
    };
    let docs = inputs(8);
    let job_id = manager
        .create_job("extract_text", docs.clone(), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    assert_eq!(*processed.lock(), docs);
}

#[tokio::test]
async fn progress_events_reach_subscribers() {
    let (_processed, handler) = RecordingHandler::arcs();
    let (_dir, manager) = manager_with("extract_text", handler).await;
    let mut events = manager.subscribe_progress();

    let job_id = manager
        .create_job("extract_text", inputs(5), Value::Null, quick_config())
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();
    manager.await_completion(job_id).await.unwrap();

    // At minimum the final snapshot is emitted.
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job_id);
        last = Some(event);
    }
    let last = last.expect("at least one progress event");
    assert_eq!(last.snapshot.succeeded, 5);
    assert_eq!(last.snapshot.pending, 0);
}

#[tokio::test]
async fn resume_processes_only_the_unfinished_remainder() {
    // Simulate a job interrupted mid-run: a prior process persisted the job
    // record and a checkpoint covering the first two tasks, then died.
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()));

    let docs = inputs(5);
    let mut job = BatchJob::new(
        "extract_text".to_string(),
        docs.clone(),
        Value::Null,
        quick_config(),
    );
    let tasks = job.materialize_tasks();
    job.mark_running();
    store.save_job(&job).await.unwrap();

    let completed: std::collections::HashSet<_> =
        tasks.iter().take(2).map(|task| task.task_id).collect();
    store
        .save_checkpoint(&Checkpoint::new(job.job_id, completed))
        .await
        .unwrap();

    // Fresh process: new manager over the same store.
    let (processed, handler) = RecordingHandler::arcs();
    let registry = OperationRegistry::new();
    registry.register("extract_text", handler).await;
    let manager = JobManager::new(registry, Arc::clone(&store) as Arc<dyn CheckpointStore>);

    manager.resume_job(job.job_id).await.unwrap();
    manager.await_completion(job.job_id).await.unwrap();

    // Only the three unfinished inputs were re-executed.
    let mut executed = processed.lock().clone();
    executed.sort();
    assert_eq!(executed, docs[2..].to_vec());

    let report = manager.get_report(job.job_id).await.unwrap();
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.counters.succeeded, 5);
    assert_eq!(report.task_outcomes.len(), 5);

    let restored: Vec<_> = report
        .task_outcomes
        .iter()
        .filter(|outcome| outcome.restored_from_checkpoint)
        .collect();
    assert_eq!(restored.len(), 2);
    assert!(restored.iter().all(|o| o.state == TaskState::Succeeded));
}

#[tokio::test]
async fn resume_of_unknown_job_is_rejected() {
    let (_processed, handler) = RecordingHandler::arcs();
    let (_dir, manager) = manager_with("extract_text", handler).await;

    let result = manager.resume_job(uuid::Uuid::new_v4()).await;
    assert!(matches!(
        result,
        Err(docbatch_core::BatchError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn shutdown_cancels_running_jobs() {
    let handler = Arc::new(RecordingHandler {
        processed: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::from_millis(30),
        fail_substring: None,
    });
    let (_dir, manager) = manager_with("extract_text", handler).await;

    let config = BatchConfig {
        concurrency: 1,
        ..quick_config()
    };
    let job_id = manager
        .create_job("extract_text", inputs(20), Value::Null, config)
        .await
        .unwrap();
    manager.start_job(job_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.shutdown().await;

    let status = manager.get_status(job_id).await.unwrap();
    assert!(status.state.is_terminal());
    assert_eq!(status.state, JobState::Cancelled);
}
