//! # Operation Registry
//!
//! Name-keyed registry of operation handlers with thread-safe management.
//!
//! ## Overview
//!
//! The registry maps an operation name to a handler satisfying the uniform
//! [`OperationHandler`] contract. The engine consumes handlers through this
//! capability-typed lookup; it never implements document transformations
//! itself. Front ends (CLI/API/GUI) and plugin loaders register handlers at
//! process start.
//!
//! ## Usage
//!
//! ```rust
//! use docbatch_core::registry::OperationRegistry;
//! use docbatch_core::registry::handler::{OperationHandler, OperationResult};
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct ExtractText;
//!
//! #[async_trait]
//! impl OperationHandler for ExtractText {
//!     async fn execute(&self, input: &str, _out: Option<&str>, _params: &Value) -> OperationResult {
//!         OperationResult::success(vec![format!("{input}.txt")])
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let registry = OperationRegistry::new();
//! registry.register("extract_text", Arc::new(ExtractText)).await;
//! assert!(registry.contains("extract_text").await);
//! # });
//! ```

pub mod handler;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub use handler::{OperationError, OperationErrorKind, OperationHandler, OperationResult};

/// Registry mapping operation names to handlers.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn OperationHandler>>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler under an operation name, replacing any previous
    /// registration for that name.
    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        let name = name.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(name.clone(), handler).is_some() {
            debug!(operation = %name, "Replacing existing handler registration");
        }
        info!(operation = %name, "Registered operation handler");
    }

    /// Resolve a handler by operation name.
    pub async fn resolve(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    /// List registered operation names, sorted.
    pub async fn supported_operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
