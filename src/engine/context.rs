//! Per-run execution state shared across executor invocations.
//!
//! The engine creates one `ExecutionContext` at the start of a run and
//! shares it by reference with every executor invocation. Only the engine
//! writes the outputs map and the iteration frame; executors read them
//! through the expression scope. The memory store is the one piece of
//! shared state executors write themselves.

use crate::error::Error;
use crate::expr::EvalScope;
use crate::store::MemoryStore;
use crate::workflow::Workflow;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// The triggering request: method, path, headers, query, and body. Read-only
/// for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Value::Null,
        }
    }
}

impl RequestContext {
    /// Wraps a bare payload as a `POST /` request.
    #[must_use]
    pub fn post_root(body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            path: "/".to_string(),
            body,
            ..Self::default()
        }
    }
}

/// Mutable per-run crucible threaded through every executor invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    /// The loaded workflow document, read-only.
    pub workflow: Arc<Workflow>,
    /// The triggering request, read-only for the run.
    pub request: RequestContext,
    /// Ephemeral store used by executors for caching.
    pub memory: Arc<MemoryStore>,
    /// Filesystem root hint passed to the shell executor.
    pub fs_root: Option<PathBuf>,
    outputs: RwLock<IndexMap<String, Value>>,
    item: RwLock<Option<Value>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(workflow: Arc<Workflow>, request: RequestContext, memory: Arc<MemoryStore>) -> Self {
        Self {
            workflow,
            request,
            memory,
            fs_root: None,
            outputs: RwLock::new(IndexMap::new()),
            item: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_fs_root(mut self, fs_root: Option<PathBuf>) -> Self {
        self.fs_root = fs_root;
        self
    }

    /// Records a completed resource's result. Each action id is written
    /// exactly once per run; the engine is the only writer.
    ///
    /// # Errors
    ///
    /// Returns an error on a repeated write for the same action id.
    pub fn insert_output(&self, action_id: &str, value: Value) -> Result<(), Error> {
        let mut outputs = self.outputs.write().unwrap_or_else(|e| e.into_inner());
        if outputs.contains_key(action_id) {
            return Err(Error::runtime_error(format!(
                "output for '{action_id}' written twice in one run"
            )));
        }
        outputs.insert(action_id.to_string(), value);
        Ok(())
    }

    /// Snapshot of the outputs recorded so far.
    #[must_use]
    pub fn outputs(&self) -> IndexMap<String, Value> {
        self.outputs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Binds the current iteration element. The frame holds at most one
    /// element; the engine sets it around each item of an iterated
    /// resource and clears it before the next resource.
    pub fn set_item(&self, value: Value) {
        *self.item.write().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    pub fn clear_item(&self) {
        *self.item.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    #[must_use]
    pub fn current_item(&self) -> Option<Value> {
        self.item.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Assembles the expression environment for this point in the run:
    /// `request`, `input` (the request body), `outputs`, and `item` when an
    /// iteration frame is bound.
    #[must_use]
    pub fn expression_scope(&self) -> EvalScope {
        let mut root = Map::new();
        root.insert(
            "request".to_string(),
            json!({
                "method": self.request.method,
                "path": self.request.path,
                "headers": self.request.headers,
                "query": self.request.query,
                "body": self.request.body,
            }),
        );
        root.insert("input".to_string(), self.request.body.clone());

        let outputs = self.outputs.read().unwrap_or_else(|e| e.into_inner());
        let mut outputs_map = Map::with_capacity(outputs.len());
        for (k, v) in outputs.iter() {
            outputs_map.insert(k.clone(), v.clone());
        }
        root.insert("outputs".to_string(), Value::Object(outputs_map));

        if let Some(item) = self.current_item() {
            root.insert("item".to_string(), item);
        }

        EvalScope::new(Value::Object(root))
    }

    /// Consumes the context, yielding the recorded outputs.
    #[must_use]
    pub fn into_outputs(self) -> IndexMap<String, Value> {
        self.outputs.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}
