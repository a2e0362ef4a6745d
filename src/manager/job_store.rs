//! In-process registry of managed jobs.
//!
//! The store has an explicit lifecycle: jobs enter at `create_job`, stay
//! addressable while running and through their retention window, and leave
//! via `cleanup_expired_jobs`. No global state; every manager owns its store.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::execution::CancellationToken;
use crate::models::{BatchJob, TaskOutcome};
use crate::progress::ProgressTracker;

/// Live execution machinery for one run of a job.
///
/// Replaced wholesale when a job is resumed: a resume gets a fresh tracker
/// and a fresh cancellation token.
pub struct RunHandles {
    pub tracker: Arc<ProgressTracker>,
    pub cancellation: CancellationToken,
    /// Taken by the first caller that joins the run.
    pub supervisor: Option<JoinHandle<()>>,
}

/// One managed job: the durable record plus in-process execution state.
pub struct JobHandle {
    pub job: RwLock<BatchJob>,
    pub run: Mutex<Option<RunHandles>>,
    /// Terminal task outcomes, shared with the worker pool.
    pub outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
    /// Job-level warnings, shared with the worker pool.
    pub warnings: Arc<Mutex<Vec<String>>>,
}

impl JobHandle {
    pub fn new(job: BatchJob) -> Self {
        Self {
            job: RwLock::new(job),
            run: Mutex::new(None),
            outcomes: Arc::new(Mutex::new(Vec::new())),
            warnings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cancellation token of the current run, if one exists.
    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.run.lock().as_ref().map(|run| run.cancellation.clone())
    }

    /// Take the supervisor join handle of the current run, if still present.
    pub fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.run
            .lock()
            .as_mut()
            .and_then(|run| run.supervisor.take())
    }
}

/// Concurrent map of job id to handle.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<Uuid, Arc<JobHandle>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<JobHandle>) {
        let job_id = handle.job.read().job_id;
        self.jobs.insert(job_id, handle);
    }

    pub fn get(&self, job_id: Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.get(&job_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, job_id: Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.remove(&job_id).map(|(_, handle)| handle)
    }

    pub fn all(&self) -> Vec<Arc<JobHandle>> {
        self.jobs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use serde_json::Value;

    fn handle() -> Arc<JobHandle> {
        Arc::new(JobHandle::new(BatchJob::new(
            "compress".to_string(),
            vec!["a.pdf".to_string()],
            Value::Null,
            BatchConfig::default(),
        )))
    }

    #[test]
    fn test_insert_get_remove() {
        let store = JobStore::new();
        let handle = handle();
        let job_id = handle.job.read().job_id;

        store.insert(Arc::clone(&handle));
        assert_eq!(store.len(), 1);
        assert!(store.get(job_id).is_some());
        assert!(store.get(Uuid::new_v4()).is_none());

        assert!(store.remove(job_id).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_supervisor_taken_once() {
        let handle = handle();
        *handle.run.lock() = Some(RunHandles {
            tracker: Arc::new(ProgressTracker::new(
                Uuid::new_v4(),
                1,
                crate::progress::ProgressPublisher::default(),
                std::time::Duration::from_millis(0),
            )),
            cancellation: CancellationToken::new(),
            supervisor: None,
        });
        assert!(handle.take_supervisor().is_none());
        assert!(handle.cancellation().is_some());
    }
}
