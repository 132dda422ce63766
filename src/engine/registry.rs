//! Executor registry: kind discriminator → adapter.
//!
//! The registry is built at engine setup and never mutated afterwards.
//! Sandbox deployments build a reduced table without the shell and
//! local-process adapters; the validator refuses workflows naming those
//! kinds before any work starts.

use crate::engine::context::ExecutionContext;
use crate::error::Error;
use crate::executors::{
    ChatExecutor, ExecExecutor, HttpExecutor, PythonExecutor, SqlExecutor,
};
use crate::workflow::{ResourceKind, RunSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Uniform adapter contract every executor satisfies: resolve its config
/// from the opaque `RunSpec` payload, do the work, return a result map.
/// A payload whose variant does not match the adapter's kind fails with
/// `invalid config type for <kind> executor`.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error>;
}

/// Dispatch table from resource kind to adapter.
pub struct ExecutorRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// An empty registry; populate with [`register`](Self::register)
    /// before handing it to an engine.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The full table: every kind weft knows.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ExecExecutor));
        registry.register(Arc::new(HttpExecutor));
        registry.register(Arc::new(SqlExecutor));
        registry.register(Arc::new(ChatExecutor));
        registry.register(Arc::new(PythonExecutor));
        registry
    }

    /// The restricted table for sandbox deployments: remote-only kinds,
    /// no shell and no local-process executors.
    #[must_use]
    pub fn sandbox() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(HttpExecutor));
        registry.register(Arc::new(SqlExecutor));
        registry.register(Arc::new(ChatExecutor));
        registry
    }

    /// Adds an adapter, replacing any existing adapter for its kind.
    /// Intended for engine setup only.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.adapters.insert(executor.kind(), executor);
    }

    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn Executor>> {
        self.adapters.get(&kind)
    }

    #[must_use]
    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.adapters.contains_key(&kind)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
