//! Sandbox entry point.
//!
//! Restricted deployments (browser-hosted builds and other remote-only
//! environments) drive the engine through three operations: `init` parses
//! and retains a workflow under sandbox validation rules, `execute` runs
//! it against a request payload, and `validate` reports structural plus
//! sandbox-restriction errors without retaining anything. The registry
//! behind this entry point omits the shell and local-process executors.

use crate::engine::context::RequestContext;
use crate::engine::{Engine, RunOutcome};
use crate::error::Error;
use crate::store::MemoryStore;
use crate::workflow::validator::{validate_workflow, ValidationMode};
use crate::workflow::{load_workflow, Workflow};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Marker key an input object carries to be treated as a full request
/// context rather than a bare body.
const REQUEST_MARKER: &str = "__request";

/// Validation report returned by [`SandboxRuntime::validate`].
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Sandbox-facing runtime holding one workflow at a time.
pub struct SandboxRuntime {
    engine: Engine,
    memory: Arc<MemoryStore>,
    workflow: RwLock<Option<Arc<Workflow>>>,
}

impl SandboxRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: Engine::sandboxed(),
            memory: Arc::new(MemoryStore::new()),
            workflow: RwLock::new(None),
        }
    }

    /// Parses and retains a workflow plus optional environment bindings.
    /// Environment variables apply best-effort; failures are ignored.
    ///
    /// # Errors
    ///
    /// Returns a human-readable error when the document does not parse or
    /// is invalid under sandbox rules.
    pub async fn init(
        &self,
        workflow_yaml: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<(), Error> {
        let workflow = load_workflow(workflow_yaml)?;
        let errors = validate_workflow(&workflow, ValidationMode::Sandbox);
        if !errors.is_empty() {
            return Err(Error::invalid_workflow(&errors));
        }

        if let Some(env) = env {
            for (name, value) in env {
                if name.trim().is_empty() {
                    continue;
                }
                std::env::set_var(name, value);
            }
        }

        *self.workflow.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(workflow));
        Ok(())
    }

    /// Executes the retained workflow against an input payload.
    ///
    /// The input is JSON text: an object carrying `"__request": true` is a
    /// full request context (method, path, headers, query, body); anything
    /// else wraps as a `POST /` body. When a callback is supplied it
    /// receives `{type: "result", data: <result>}` before the result is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error when no workflow is initialized, the input does
    /// not parse, or the run fails.
    pub async fn execute(
        &self,
        input_json: &str,
        callback: Option<Box<dyn FnOnce(&Value) + Send>>,
    ) -> Result<Value, Error> {
        let workflow = self
            .workflow
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::runtime_error("no workflow initialized; call init first"))?;

        let request = parse_input(input_json)?;
        let outcome = self
            .engine
            .execute_with_memory(workflow, request, Arc::clone(&self.memory))
            .await?;

        let result = closure_value(&outcome);
        if let Some(callback) = callback {
            callback(&json!({ "type": "result", "data": result }));
        }
        Ok(result)
    }

    /// Reports structural and sandbox-restriction errors for a workflow
    /// document without retaining it.
    pub async fn validate(&self, workflow_yaml: &str) -> ValidationReport {
        match load_workflow(workflow_yaml) {
            Ok(workflow) => {
                let errors = validate_workflow(&workflow, ValidationMode::Sandbox);
                ValidationReport {
                    valid: errors.is_empty(),
                    errors,
                }
            }
            Err(e) => ValidationReport {
                valid: false,
                errors: vec![e.to_json().message],
            },
        }
    }
}

impl Default for SandboxRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Captured artifacts of the target's transitive closure, as a JSON object.
fn closure_value(outcome: &RunOutcome) -> Value {
    let mut map = serde_json::Map::new();
    for (id, value) in outcome.target_closure() {
        map.insert(id, value);
    }
    Value::Object(map)
}

fn parse_input(input_json: &str) -> Result<RequestContext, Error> {
    let value: Value = serde_json::from_str(input_json)?;

    let is_request = value
        .get(REQUEST_MARKER)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_request {
        return Ok(RequestContext::post_root(value));
    }

    let string_map = |key: &str| -> HashMap<String, String> {
        value
            .get(key)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let text = v
                            .as_str()
                            .map_or_else(|| v.to_string(), ToString::to_string);
                        (k.clone(), text)
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(RequestContext {
        method: value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase(),
        path: value
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string(),
        headers: string_map("headers"),
        query: string_map("query"),
        body: value.get("body").cloned().unwrap_or(Value::Null),
    })
}
