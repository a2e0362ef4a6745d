//! Task records: the unit of work for a single input within a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::states::TaskState;
use crate::registry::handler::OperationError;

/// One unit of work: a single input reference processed under one operation.
///
/// A task is exclusively owned by whichever worker currently has it
/// `Running`; it is dequeued exactly once and never shared between workers.
/// Terminal states are final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub job_id: Uuid,
    /// Position of the input in the job's ordered input list.
    pub input_index: usize,
    pub input_ref: String,
    pub params: Value,
    pub state: TaskState,
    /// Number of handler invocations so far (1 on first attempt).
    pub attempts: u32,
    pub outputs: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<OperationError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: Uuid, input_index: usize, input_ref: String, params: Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_id,
            input_index,
            input_ref,
            params,
            state: TaskState::Pending,
            attempts: 0,
            outputs: Vec::new(),
            warnings: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Materialize a task with a pre-assigned id, used when resuming a job so
    /// checkpointed task identities survive re-materialization.
    pub fn with_id(
        task_id: Uuid,
        job_id: Uuid,
        input_index: usize,
        input_ref: String,
        params: Value,
    ) -> Self {
        Self {
            task_id,
            ..Self::new(job_id, input_index, input_ref, params)
        }
    }

    /// Terminal states are final; a transition attempt out of one is a bug in
    /// the caller and is refused.
    fn refuse_if_terminal(&self, transition: &str) -> bool {
        if self.state.is_terminal() {
            warn!(
                task_id = %self.task_id,
                state = %self.state,
                transition = transition,
                "Refusing state transition on terminal task"
            );
            return true;
        }
        false
    }

    pub fn mark_running(&mut self) {
        if self.refuse_if_terminal("running") {
            return;
        }
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self, outputs: Vec<String>, warnings: Vec<String>) {
        if self.refuse_if_terminal("succeeded") {
            return;
        }
        self.state = TaskState::Succeeded;
        self.outputs = outputs;
        self.warnings = warnings;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: OperationError, warnings: Vec<String>) {
        if self.refuse_if_terminal("failed") {
            return;
        }
        self.state = TaskState::Failed;
        self.error = Some(error);
        self.warnings = warnings;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        if self.refuse_if_terminal("cancelled") {
            return;
        }
        self.state = TaskState::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock execution time, if the task ran to a terminal state.
    pub fn execution_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
