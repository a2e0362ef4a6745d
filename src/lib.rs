//! # DocBatch Core
//!
//! High-performance batch job execution core for document-processing
//! pipelines.
//!
//! ## Overview
//!
//! The engine applies one named operation across many input documents with
//! bounded concurrency. Document transformations themselves live behind the
//! [`registry::OperationHandler`] contract; this crate only provides the
//! execution machinery:
//!
//! - **Job management**: create, start, observe, cancel, resume, and report
//!   on batch jobs through [`manager::JobManager`]
//! - **Bounded execution**: a fixed worker pool fed from a bounded FIFO queue
//! - **Partial-failure tolerance**: per-task failures are isolated and
//!   recorded, never fatal to the job by default
//! - **Retry with backoff**: transient failures retry with capped
//!   exponential backoff and jitter
//! - **Progress visibility**: atomic counters, throughput/ETA estimates, and
//!   broadcast progress events
//! - **Checkpoint/resume**: periodic persistence of completed work so an
//!   interrupted job re-executes only the remainder (at-least-once)
//! - **Cooperative cancellation**: a per-job flag observed between task
//!   executions; in-flight handler calls run to completion
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use docbatch_core::checkpoint::FileCheckpointStore;
//! use docbatch_core::config::BatchConfig;
//! use docbatch_core::manager::JobManager;
//! use docbatch_core::registry::{OperationHandler, OperationRegistry, OperationResult};
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct ExtractText;
//!
//! #[async_trait]
//! impl OperationHandler for ExtractText {
//!     async fn execute(&self, input: &str, _out: Option<&str>, _params: &Value) -> OperationResult {
//!         OperationResult::success(vec![format!("{input}.txt")])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> docbatch_core::error::Result<()> {
//!     docbatch_core::logging::init_structured_logging();
//!
//!     let registry = OperationRegistry::new();
//!     registry.register("extract_text", Arc::new(ExtractText)).await;
//!
//!     let manager = JobManager::new(
//!         registry,
//!         Arc::new(FileCheckpointStore::new("/var/lib/docbatch")),
//!     );
//!     let job_id = manager
//!         .create_job(
//!             "extract_text",
//!             vec!["a.pdf".to_string(), "b.pdf".to_string()],
//!             Value::Null,
//!             BatchConfig::default(),
//!         )
//!         .await?;
//!     manager.start_job(job_id).await?;
//!     manager.await_completion(job_id).await?;
//!
//!     let report = manager.get_report(job_id).await?;
//!     println!("{} succeeded", report.counters.succeeded);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod manager;
pub mod models;
pub mod progress;
pub mod registry;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use config::BatchConfig;
pub use error::{BatchError, Result};
pub use manager::{JobManager, JobStatus};
pub use models::{BatchJob, JobCounters, JobReport, JobState, JobStatistics, TaskState};
pub use progress::{ProgressEvent, ProgressSnapshot};
pub use registry::{
    OperationError, OperationErrorKind, OperationHandler, OperationRegistry, OperationResult,
};
