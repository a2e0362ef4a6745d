//! Structured error handling for the batch engine.
//!
//! Job-setup faults (bad request, unknown operation) are raised synchronously
//! to callers; per-task faults never surface here. They are isolated by the
//! worker pool and recorded in the job report.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Malformed job request; fails fast at `create_job`, the job never starts.
    #[error("Input validation error: {0}")]
    InputValidation(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// `get_report` was called while the job is still running.
    #[error("Job {0} is not in a terminal state")]
    JobNotTerminal(Uuid),

    /// `resume_job` was called without a checkpoint or on a terminal job.
    #[error("Job {job_id} cannot be resumed: {reason}")]
    JobNotResumable { job_id: Uuid, reason: String },

    /// Admission-control rejection; the caller should retry submission later.
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint persistence failure (store I/O or serialization).
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Host-level resource exhaustion (e.g. disk full) surfaced as a
    /// job-level warning; the pool itself keeps running.
    #[error("System resource error: {0}")]
    SystemResource(String),
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Checkpoint(format!("serialization failed: {err}"))
    }
}

impl From<std::io::Error> for BatchError {
    fn from(err: std::io::Error) -> Self {
        BatchError::Checkpoint(format!("I/O failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
