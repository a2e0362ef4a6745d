//! Checkpoint writer: a single background actor per job.
//!
//! Workers send completed task ids over an unbounded channel so checkpointing
//! never blocks task execution; the actor is the only writer for its job,
//! which keeps checkpoint files free of concurrent-write races. Flushes
//! happen every N completed tasks or T elapsed seconds, whichever first, plus
//! a final flush when the channel closes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::checkpoint::store::{Checkpoint, CheckpointStore};

/// Sending half handed to the worker pool; dropping every clone triggers the
/// writer's final flush and shutdown.
pub type CompletionSender = mpsc::UnboundedSender<Uuid>;

pub struct CheckpointWriter {
    handle: JoinHandle<()>,
}

impl CheckpointWriter {
    /// Spawn the writer actor for a job.
    ///
    /// `seed` carries task ids already checkpointed before a resume so they
    /// are preserved across subsequent flushes.
    pub fn spawn(
        store: Arc<dyn CheckpointStore>,
        job_id: Uuid,
        seed: HashSet<Uuid>,
        flush_every_tasks: usize,
        flush_every: Duration,
    ) -> (CompletionSender, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(
            store,
            job_id,
            seed,
            flush_every_tasks.max(1),
            flush_every,
            receiver,
        ));
        (sender, Self { handle })
    }

    /// Wait for the final flush after the last sender is dropped.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            error!(error = %err, "Checkpoint writer task panicked");
        }
    }

    async fn run(
        store: Arc<dyn CheckpointStore>,
        job_id: Uuid,
        mut completed: HashSet<Uuid>,
        flush_every_tasks: usize,
        flush_every: Duration,
        mut receiver: mpsc::UnboundedReceiver<Uuid>,
    ) {
        let mut unflushed = 0usize;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + flush_every, flush_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Some(task_id) => {
                        if completed.insert(task_id) {
                            unflushed += 1;
                        }
                        if unflushed >= flush_every_tasks {
                            Self::flush(&*store, job_id, &completed, &mut unflushed).await;
                        }
                    }
                    None => {
                        if unflushed > 0 {
                            Self::flush(&*store, job_id, &completed, &mut unflushed).await;
                        }
                        debug!(job_id = %job_id, "Checkpoint writer shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if unflushed > 0 {
                        Self::flush(&*store, job_id, &completed, &mut unflushed).await;
                    }
                }
            }
        }
    }

    async fn flush(
        store: &dyn CheckpointStore,
        job_id: Uuid,
        completed: &HashSet<Uuid>,
        unflushed: &mut usize,
    ) {
        let checkpoint = Checkpoint::new(job_id, completed.clone());
        match store.save_checkpoint(&checkpoint).await {
            Ok(()) => *unflushed = 0,
            // A failed flush is retried at the next trigger; the job keeps
            // running with an older checkpoint on disk.
            Err(err) => error!(job_id = %job_id, error = %err, "Checkpoint flush failed"),
        }
    }
}
