//! Data model: jobs, tasks, states, and reports.

pub mod job;
pub mod report;
pub mod states;
pub mod task;

pub use job::{BatchJob, JobCounters, TaskAssignment};
pub use report::{JobReport, JobStatistics, TaskOutcome};
pub use states::{JobState, TaskState};
pub use task::Task;
