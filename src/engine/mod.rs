//! Engine driver: orchestrates a workflow run.
//!
//! Validates the document, produces a topological order over resources,
//! expands item iterations, invokes executors through the registry, and
//! captures each result into the shared outputs map. Resources run
//! sequentially in dependency order; an executor error is fatal to the
//! run, while failures an executor reports as result-map data (HTTP
//! transport failures, nonzero shell exits) are not.

pub mod context;
pub mod graph;
pub mod registry;

use crate::error::Error;
use crate::expr;
use crate::store::MemoryStore;
use crate::workflow::validator::{self, ValidationMode};
use crate::workflow::{Resource, Workflow};
use context::{ExecutionContext, RequestContext};
use indexmap::IndexMap;
use registry::ExecutorRegistry;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Workflow execution engine. Holds the executor registry (fixed at
/// construction) and the validation mode matching it.
#[derive(Debug)]
pub struct Engine {
    registry: ExecutorRegistry,
    mode: ValidationMode,
    fs_root: Option<PathBuf>,
}

impl Engine {
    /// Engine with the full executor table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: ExecutorRegistry::standard(),
            mode: ValidationMode::Full,
            fs_root: None,
        }
    }

    /// Engine restricted to remote-only executors; workflows naming shell
    /// or local-process kinds are rejected up front.
    #[must_use]
    pub fn sandboxed() -> Self {
        Self {
            registry: ExecutorRegistry::sandbox(),
            mode: ValidationMode::Sandbox,
            fs_root: None,
        }
    }

    /// Engine with a caller-provided registry and matching mode.
    #[must_use]
    pub fn with_registry(registry: ExecutorRegistry, mode: ValidationMode) -> Self {
        Self {
            registry,
            mode,
            fs_root: None,
        }
    }

    /// Filesystem root hint handed to the shell executor.
    #[must_use]
    pub fn with_fs_root(mut self, fs_root: Option<PathBuf>) -> Self {
        self.fs_root = fs_root;
        self
    }

    /// Executes a workflow against a request, returning the captured
    /// outputs keyed by action id.
    ///
    /// # Errors
    ///
    /// Returns an error when validation fails, an iteration source does
    /// not evaluate to a sequence, or an executor fails with a
    /// configuration-level error.
    pub async fn execute(
        &self,
        workflow: Arc<Workflow>,
        request: RequestContext,
    ) -> Result<RunOutcome, Error> {
        self.execute_with_memory(workflow, request, Arc::new(MemoryStore::new()))
            .await
    }

    /// Like [`execute`](Self::execute) but with a caller-owned memory
    /// store, letting caches outlive a single run.
    ///
    /// # Errors
    ///
    /// Same conditions as [`execute`](Self::execute).
    pub async fn execute_with_memory(
        &self,
        workflow: Arc<Workflow>,
        request: RequestContext,
        memory: Arc<MemoryStore>,
    ) -> Result<RunOutcome, Error> {
        let errors = validator::validate_workflow(&workflow, self.mode);
        if !errors.is_empty() {
            return Err(Error::invalid_workflow(&errors));
        }

        let order = graph::resolve_execution_order(&workflow.resources)?;
        let ctx = ExecutionContext::new(Arc::clone(&workflow), request, memory)
            .with_fs_root(self.fs_root.clone());

        info!(workflow = %workflow.metadata.name, resources = workflow.resources.len(), "starting run");

        for idx in order {
            let resource = &workflow.resources[idx];
            self.run_resource(&ctx, resource).await?;
        }

        info!(workflow = %workflow.metadata.name, "run complete");

        Ok(RunOutcome {
            workflow,
            outputs: ctx.into_outputs(),
        })
    }

    async fn run_resource(
        &self,
        ctx: &ExecutionContext,
        resource: &Resource,
    ) -> Result<(), Error> {
        let action_id = resource.action_id();
        let kind = resource.kind();
        let adapter = self
            .registry
            .get(kind)
            .ok_or_else(|| Error::missing_adapter(kind.as_str()))?;

        debug!(%action_id, %kind, "executing resource");

        if let Some(items_expr) = &resource.items {
            let elements = evaluate_items(items_expr, ctx, action_id)?;
            let mut collected = Vec::with_capacity(elements.len());
            for element in elements {
                ctx.set_item(element);
                // The frame must not leak into the next resource even on
                // failure.
                match adapter.execute(ctx, &resource.run).await {
                    Ok(value) => collected.push(value),
                    Err(e) => {
                        ctx.clear_item();
                        return Err(e.with_context(&format!("resource '{action_id}'")));
                    }
                }
            }
            ctx.clear_item();
            ctx.insert_output(action_id, Value::Array(collected))?;
        } else {
            let result = adapter
                .execute(ctx, &resource.run)
                .await
                .map_err(|e| e.with_context(&format!("resource '{action_id}'")))?;
            ctx.insert_output(action_id, result)?;
        }

        debug!(%action_id, "resource complete");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates an iteration source expression to a sequence of elements.
fn evaluate_items(
    items_expr: &str,
    ctx: &ExecutionContext,
    action_id: &str,
) -> Result<Vec<Value>, Error> {
    let scope = ctx.expression_scope();
    let source = expr::single_fragment(items_expr).unwrap_or(items_expr);
    let value = expr::evaluate_expression(source, &scope)
        .map_err(|e| Error::from(e).with_context(&format!("items of resource '{action_id}'")))?;
    match value {
        Value::Array(elements) => Ok(elements),
        other => Err(Error::validation_error(format!(
            "items expression of resource '{action_id}' must yield a sequence, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Captured outputs of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub workflow: Arc<Workflow>,
    /// Result map keyed by action id, in completion order.
    pub outputs: IndexMap<String, Value>,
}

impl RunOutcome {
    /// The target resource's captured result, if it completed.
    #[must_use]
    pub fn target(&self) -> Option<&Value> {
        self.outputs.get(&self.workflow.metadata.target_action_id)
    }

    /// Outputs restricted to the target resource's transitive dependency
    /// closure (explicit `dependsOn` edges plus implicit output
    /// references), preserving completion order.
    #[must_use]
    pub fn target_closure(&self) -> IndexMap<String, Value> {
        let target = self.workflow.metadata.target_action_id.as_str();
        let mut wanted: HashSet<&str> = HashSet::new();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if !wanted.insert(id) {
                continue;
            }
            let Some(resource) = self
                .workflow
                .resources
                .iter()
                .find(|r| r.action_id() == id)
            else {
                continue;
            };
            if let Some(deps) = &resource.depends_on {
                for dep in deps {
                    stack.push(dep.as_str());
                }
            }
            for dep in implicit_references(resource, &self.workflow.resources) {
                stack.push(dep);
            }
        }

        self.outputs
            .iter()
            .filter(|(id, _)| wanted.contains(id.as_str()))
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }
}

/// Action ids a resource implicitly references through `get('id')` /
/// `outputs.id` expressions, restricted to ids that exist.
fn implicit_references<'a>(resource: &Resource, resources: &'a [Resource]) -> Vec<&'a str> {
    let mut strings = Vec::new();
    if let Some(items) = &resource.items {
        strings.push(items.clone());
    }
    if let Ok(value) = serde_json::to_value(&resource.run) {
        collect_strings(&value, &mut strings);
    }
    strings
        .iter()
        .flat_map(|s| graph::extract_output_references(s))
        .filter_map(|id| {
            resources
                .iter()
                .find(|r| r.action_id() == id)
                .map(Resource::action_id)
        })
        .collect()
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Object(map) => {
            for inner in map.values() {
                collect_strings(inner, out);
            }
        }
        Value::Array(items) => {
            for inner in items {
                collect_strings(inner, out);
            }
        }
        _ => {}
    }
}
