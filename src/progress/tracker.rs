//! Per-job progress aggregation.
//!
//! Workers report terminal task outcomes from many tasks concurrently, so all
//! counter updates are atomic; a snapshot is always internally consistent
//! with `total = succeeded + failed + cancelled + pending + running`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::JobCounters;
use crate::progress::events::ProgressPublisher;

/// Point-in-time view of a job's task counters and derived rate estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub running: u64,
    pub pending: u64,
    pub elapsed_seconds: f64,
    /// Terminal tasks per second since the job started.
    pub throughput_tasks_per_second: f64,
    /// Estimated seconds until the remaining tasks are terminal, if a rate
    /// is available yet.
    pub eta_seconds: Option<f64>,
}

/// Aggregates per-task outcomes into job-level counters and emits progress
/// events at a bounded cadence.
#[derive(Debug)]
pub struct ProgressTracker {
    job_id: Uuid,
    total: u64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    running: AtomicU64,
    started_at: Instant,
    publisher: ProgressPublisher,
    event_interval: Duration,
    last_emitted: Mutex<Option<Instant>>,
}

impl ProgressTracker {
    pub fn new(
        job_id: Uuid,
        total: u64,
        publisher: ProgressPublisher,
        event_interval: Duration,
    ) -> Self {
        Self {
            job_id,
            total,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            running: AtomicU64::new(0),
            started_at: Instant::now(),
            publisher,
            event_interval,
            last_emitted: Mutex::new(None),
        }
    }

    pub fn task_started(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn task_succeeded(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.maybe_emit();
    }

    pub fn task_failed(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.maybe_emit();
    }

    /// Record a task swept to `Cancelled` without ever running.
    pub fn task_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.maybe_emit();
    }

    /// Seed the succeeded counter with tasks restored from a checkpoint on
    /// resume; they are already terminal and will not be re-executed.
    pub fn record_restored(&self, count: u64) {
        self.succeeded.fetch_add(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        let running = self.running.load(Ordering::SeqCst);
        let terminal = succeeded + failed + cancelled;
        let pending = self.total.saturating_sub(terminal + running);

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 {
            terminal as f64 / elapsed
        } else {
            0.0
        };
        let eta_seconds = if throughput > 0.0 && terminal < self.total {
            Some((self.total - terminal) as f64 / throughput)
        } else {
            None
        };

        ProgressSnapshot {
            total: self.total,
            succeeded,
            failed,
            cancelled,
            running,
            pending,
            elapsed_seconds: elapsed,
            throughput_tasks_per_second: throughput,
            eta_seconds,
        }
    }

    pub fn to_counters(&self) -> JobCounters {
        let snapshot = self.snapshot();
        JobCounters {
            total: snapshot.total,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            cancelled: snapshot.cancelled,
        }
    }

    /// True once every task is terminal.
    pub fn all_terminal(&self) -> bool {
        let snapshot = self.snapshot();
        snapshot.succeeded + snapshot.failed + snapshot.cancelled == snapshot.total
    }

    /// Emit a progress event if the configured cadence has elapsed. Cheap and
    /// non-blocking, safe to call from worker loops.
    pub fn maybe_emit(&self) {
        let mut last = self.last_emitted.lock();
        let due = last
            .map(|at| at.elapsed() >= self.event_interval)
            .unwrap_or(true);
        if due {
            *last = Some(Instant::now());
            drop(last);
            self.publisher.publish(self.job_id, self.snapshot());
        }
    }

    /// Emit unconditionally, e.g. the final snapshot at job completion.
    pub fn emit_now(&self) {
        *self.last_emitted.lock() = Some(Instant::now());
        self.publisher.publish(self.job_id, self.snapshot());
    }
}
