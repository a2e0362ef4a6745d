//! Checkpointing and crash resumability.
//!
//! Completed task ids are periodically persisted so an interrupted job can be
//! resumed without re-executing recorded work. The guarantee is at-least-once:
//! tasks completed after the last flush are reprocessed on resume, which is
//! why handler idempotence is a documented precondition of the handler
//! contract.

pub mod store;
pub mod writer;

pub use store::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use writer::{CheckpointWriter, CompletionSender};
