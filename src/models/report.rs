//! Job reports: per-task outcomes plus aggregate summary, available once a
//! job reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::job::{BatchJob, JobCounters};
use crate::models::states::{JobState, TaskState};
use crate::models::task::Task;
use crate::registry::handler::{OperationError, OperationErrorKind};

/// Final outcome of a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub input_index: usize,
    pub input_ref: String,
    pub state: TaskState,
    pub attempts: u32,
    pub outputs: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<OperationError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// True when the outcome was reconstructed from a checkpoint on resume;
    /// execution detail for such tasks was lost with the original process.
    pub restored_from_checkpoint: bool,
}

impl TaskOutcome {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            input_index: task.input_index,
            input_ref: task.input_ref.clone(),
            state: task.state,
            attempts: task.attempts,
            outputs: task.outputs.clone(),
            warnings: task.warnings.clone(),
            error: task.error.clone(),
            started_at: task.started_at,
            completed_at: task.completed_at,
            restored_from_checkpoint: false,
        }
    }

    /// Synthesize a succeeded outcome for a task recorded complete in a
    /// checkpoint before the process was interrupted.
    pub fn restored(task_id: Uuid, input_index: usize, input_ref: String) -> Self {
        Self {
            task_id,
            input_index,
            input_ref,
            state: TaskState::Succeeded,
            attempts: 0,
            outputs: Vec::new(),
            warnings: vec!["outcome restored from checkpoint".to_string()],
            error: None,
            started_at: None,
            completed_at: None,
            restored_from_checkpoint: true,
        }
    }
}

/// Derived performance and error statistics for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Succeeded / total, as a percentage.
    pub success_rate: f64,
    pub duration_seconds: f64,
    pub throughput_tasks_per_second: f64,
    pub average_task_seconds: f64,
    pub total_warnings: usize,
    pub total_errors: usize,
}

/// Comprehensive batch operation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub operation: String,
    pub state: JobState,
    pub counters: JobCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Job-level warnings (e.g. system resource pressure during execution).
    pub warnings: Vec<String>,
    pub statistics: JobStatistics,
    /// Failed-task counts broken down by error kind.
    pub error_summary: HashMap<OperationErrorKind, usize>,
    /// Heuristic operator hints derived from the outcome mix.
    pub recommendations: Vec<String>,
    /// Per-task outcomes in input submission order.
    pub task_outcomes: Vec<TaskOutcome>,
}

impl JobReport {
    pub fn compile(
        job: &BatchJob,
        mut task_outcomes: Vec<TaskOutcome>,
        warnings: Vec<String>,
    ) -> Self {
        task_outcomes.sort_by_key(|outcome| outcome.input_index);

        let duration_seconds = job
            .duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let terminal_count = job.counters.succeeded + job.counters.failed;
        let success_rate = if job.counters.total > 0 {
            (job.counters.succeeded as f64 / job.counters.total as f64) * 100.0
        } else {
            0.0
        };
        let throughput = if duration_seconds > 0.0 {
            terminal_count as f64 / duration_seconds
        } else {
            0.0
        };

        let executed: Vec<f64> = task_outcomes
            .iter()
            .filter_map(|outcome| match (outcome.started_at, outcome.completed_at) {
                (Some(start), Some(end)) => {
                    Some((end - start).num_milliseconds() as f64 / 1000.0)
                }
                _ => None,
            })
            .collect();
        let average_task_seconds = if executed.is_empty() {
            0.0
        } else {
            executed.iter().sum::<f64>() / executed.len() as f64
        };

        let total_warnings = warnings.len()
            + task_outcomes
                .iter()
                .map(|outcome| outcome.warnings.len())
                .sum::<usize>();
        let total_errors = task_outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .count();

        let mut error_summary: HashMap<OperationErrorKind, usize> = HashMap::new();
        for outcome in &task_outcomes {
            if let Some(error) = &outcome.error {
                *error_summary.entry(error.kind).or_insert(0) += 1;
            }
        }

        let statistics = JobStatistics {
            success_rate,
            duration_seconds,
            throughput_tasks_per_second: throughput,
            average_task_seconds,
            total_warnings,
            total_errors,
        };
        let recommendations = Self::recommendations(job, &statistics, &error_summary);

        Self {
            job_id: job.job_id,
            operation: job.operation.clone(),
            state: job.state,
            counters: job.counters,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            warnings,
            statistics,
            error_summary,
            recommendations,
            task_outcomes,
        }
    }

    /// Operator hints derived from the outcome mix, in the vein of a human
    /// post-run review: what to check before resubmitting.
    fn recommendations(
        job: &BatchJob,
        statistics: &JobStatistics,
        error_summary: &HashMap<OperationErrorKind, usize>,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        if statistics.success_rate < 50.0 {
            recommendations.push(
                "Low success rate - verify input documents before resubmitting".to_string(),
            );
        }
        if statistics.total_errors as f64 > job.counters.total as f64 * 0.2 {
            recommendations.push(
                "High error rate detected - review input documents and operation parameters"
                    .to_string(),
            );
        }
        if statistics.average_task_seconds > 10.0 {
            recommendations.push(
                "Tasks are slow on average - consider lowering concurrency or splitting the batch"
                    .to_string(),
            );
        }
        if error_summary.contains_key(&OperationErrorKind::Transient) {
            recommendations.push(
                "Transient failures remained after retry - a higher max_retry_attempts may absorb them"
                    .to_string(),
            );
        }
        if error_summary.contains_key(&OperationErrorKind::SystemResource) {
            recommendations.push(
                "System resource errors recorded - free disk space or memory before retrying"
                    .to_string(),
            );
        }

        recommendations
    }

    /// Input references of every failed task, in submission order.
    pub fn failed_inputs(&self) -> Vec<String> {
        self.task_outcomes
            .iter()
            .filter(|outcome| outcome.state == TaskState::Failed)
            .map(|outcome| outcome.input_ref.clone())
            .collect()
    }
}
