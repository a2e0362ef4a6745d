//! Batch job records: one named operation applied across many inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::models::states::JobState;
use crate::models::task::Task;

/// Aggregate task counters for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Stable mapping from a materialized task id to its input position.
///
/// Persisted with the job record so checkpointed task ids can be matched back
/// to inputs when a job is resumed in a fresh process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    pub input_index: usize,
}

/// A request to apply one operation to an ordered set of inputs under a given
/// configuration. Owned exclusively by the `JobManager`; mutated only through
/// progress updates and cancellation signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub operation: String,
    pub inputs: Vec<String>,
    pub params: Value,
    pub config: BatchConfig,
    pub state: JobState,
    pub counters: JobCounters,
    /// Task id assignments, populated when the job is started.
    pub tasks: Vec<TaskAssignment>,
    pub cancellation_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(operation: String, inputs: Vec<String>, params: Value, config: BatchConfig) -> Self {
        let total = inputs.len() as u64;
        Self {
            job_id: Uuid::new_v4(),
            operation,
            inputs,
            params,
            config,
            state: JobState::Pending,
            counters: JobCounters {
                total,
                ..JobCounters::default()
            },
            tasks: Vec::new(),
            cancellation_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Materialize one task per input, recording the id assignment so the
    /// mapping survives persistence.
    pub fn materialize_tasks(&mut self) -> Vec<Task> {
        let tasks: Vec<Task> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                Task::new(self.job_id, index, input.clone(), self.params.clone())
            })
            .collect();

        self.tasks = tasks
            .iter()
            .map(|task| TaskAssignment {
                task_id: task.task_id,
                input_index: task.input_index,
            })
            .collect();

        tasks
    }

    /// Re-materialize the pending task set for a resume: every assigned task
    /// whose id is not in the checkpointed completed set, with its original
    /// identity preserved.
    pub fn materialize_remaining_tasks(&self, completed: &HashSet<Uuid>) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|assignment| !completed.contains(&assignment.task_id))
            .filter_map(|assignment| {
                self.inputs.get(assignment.input_index).map(|input| {
                    Task::with_id(
                        assignment.task_id,
                        self.job_id,
                        assignment.input_index,
                        input.clone(),
                        self.params.clone(),
                    )
                })
            })
            .collect()
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_terminal(&mut self, state: JobState, counters: JobCounters) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.counters = counters;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock duration from start to completion (or to now while running).
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - start)
    }
}
