//! Progress event publishing for external observers (CLI progress bars, API
//! pollers). Emission never blocks worker progress: events go through a
//! broadcast channel and are dropped when no one is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::progress::tracker::ProgressSnapshot;

/// A progress update for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub snapshot: ProgressSnapshot,
    pub emitted_at: DateTime<Utc>,
}

/// Broadcast publisher for job progress events.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressPublisher {
    /// Create a new publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a progress event.
    ///
    /// A broadcast send fails only when there are no subscribers, which is
    /// acceptable here: progress is advisory.
    pub fn publish(&self, job_id: Uuid, snapshot: ProgressSnapshot) {
        let event = ProgressEvent {
            job_id,
            snapshot,
            emitted_at: Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
