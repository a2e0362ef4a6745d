//! The operation handler contract consumed by the worker pool.
//!
//! Handlers implement one named document transformation. The engine treats a
//! handler invocation as an opaque, non-interruptible call and applies retry
//! policy based on the error kind it reports.
//!
//! Handlers must be idempotent at the file-output level: a task may be
//! re-executed after a retry or a crash resume (at-least-once execution), so
//! outputs must use distinct or safely overwritten paths.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Failure classification reported by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorKind {
    /// May succeed on retry (I/O timeout, temporary lock).
    Transient,
    /// Will never succeed on retry (corrupt input, unsupported format).
    Permanent,
    /// Host-level exhaustion (disk full); fails the task and raises a
    /// job-level warning.
    SystemResource,
}

impl fmt::Display for OperationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::SystemResource => write!(f, "system_resource"),
        }
    }
}

/// Error detail captured from a failed handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    pub kind: OperationErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: OperationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Permanent, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, OperationErrorKind::Transient)
    }
}

/// Uniform result contract for operation handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// References produced by the operation (output files, etc.).
    pub outputs: Vec<String>,
    pub error: Option<OperationError>,
    pub warnings: Vec<String>,
}

impl OperationResult {
    pub fn success(outputs: Vec<String>) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failure(error: OperationError) -> Self {
        Self {
            success: false,
            outputs: Vec::new(),
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// A callable registered under an operation name.
///
/// `input_ref` is an opaque input reference (typically a file path);
/// `output_template` is an optional location template for produced outputs;
/// `params` carries operation-specific parameters.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(
        &self,
        input_ref: &str,
        output_template: Option<&str>,
        params: &Value,
    ) -> OperationResult;
}
