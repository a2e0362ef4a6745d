//! Durable storage for job records and checkpoints.
//!
//! The engine only requires the `CheckpointStore` contract; the file-backed
//! implementation here keeps one JSON document per record and writes through
//! a temp-file rename so a crash never leaves a torn checkpoint behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::BatchJob;

/// Durable record of which tasks in a job have completed, enabling resume
/// after interruption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: Uuid,
    pub completed_task_ids: HashSet<Uuid>,
    pub snapshot_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(job_id: Uuid, completed_task_ids: HashSet<Uuid>) -> Self {
        Self {
            job_id,
            completed_task_ids,
            snapshot_at: Utc::now(),
        }
    }
}

/// Persistence contract for job records and checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_job(&self, job: &BatchJob) -> Result<()>;
    async fn load_job(&self, job_id: Uuid) -> Result<Option<BatchJob>>;
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn load_checkpoint(&self, job_id: Uuid) -> Result<Option<Checkpoint>>;
    /// Remove the job record and checkpoint, if present.
    async fn delete(&self, job_id: Uuid) -> Result<()>;
}

/// JSON-on-disk checkpoint store, one file per record.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.job.json"))
    }

    fn checkpoint_path(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.checkpoint.json"))
    }

    async fn write_atomic(&self, path: &PathBuf, bytes: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: PathBuf,
    ) -> Result<Option<T>> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_job(&self, job: &BatchJob) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(job)?;
        self.write_atomic(&self.job_path(job.job_id), bytes).await?;
        debug!(job_id = %job.job_id, state = %job.state, "Persisted job record");
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        self.read_json(self.job_path(job_id)).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        self.write_atomic(&self.checkpoint_path(checkpoint.job_id), bytes)
            .await?;
        debug!(
            job_id = %checkpoint.job_id,
            completed = checkpoint.completed_task_ids.len(),
            "Persisted checkpoint"
        );
        Ok(())
    }

    async fn load_checkpoint(&self, job_id: Uuid) -> Result<Option<Checkpoint>> {
        self.read_json(self.checkpoint_path(job_id)).await
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        for path in [self.job_path(job_id), self.checkpoint_path(job_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
