//! Progress tracking: job-level counters, throughput/ETA estimation, and
//! non-blocking progress event emission.

pub mod events;
pub mod tracker;

pub use events::{ProgressEvent, ProgressPublisher};
pub use tracker::{ProgressSnapshot, ProgressTracker};
