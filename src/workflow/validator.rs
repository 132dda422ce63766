//! Workflow validation.
//!
//! A pure inspection pass over a parsed workflow: required metadata,
//! unique action ids, resolvable dependencies, an acyclic graph, and, in
//! sandbox mode, refusal of kinds that need a local process. Output is a
//! sequence of human-readable error strings; the engine turns a non-empty
//! sequence into a fatal error before any work starts.

use crate::constants;
use crate::engine::graph;
use crate::error::Error;
use crate::workflow::{Resource, ResourceKind, RunSpec, Workflow};
use std::collections::HashSet;

/// Validation strictness matching the deployment's executor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// All kinds available.
    Full,
    /// Remote-only deployment: shell, Python, and local LLM backends are
    /// rejected.
    Sandbox,
}

/// Inspects a workflow for structural errors, returning every problem
/// found as a human-readable string.
#[must_use]
pub fn validate_workflow(workflow: &Workflow, mode: ValidationMode) -> Vec<String> {
    let mut errors = Vec::new();

    if workflow.metadata.name.trim().is_empty() {
        errors.push("metadata.name is required".to_string());
    }
    if workflow.metadata.target_action_id.trim().is_empty() {
        errors.push("metadata.targetActionId is required".to_string());
    } else if !workflow
        .resources
        .iter()
        .any(|r| r.action_id() == workflow.metadata.target_action_id)
    {
        errors.push(format!(
            "metadata.targetActionId '{}' does not name a resource",
            workflow.metadata.target_action_id
        ));
    }

    if workflow.resources.is_empty() {
        errors.push("workflow declares no resources".to_string());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for resource in &workflow.resources {
        let action_id = resource.action_id();
        if action_id.trim().is_empty() {
            errors.push("resource with empty actionId".to_string());
        } else if !seen.insert(action_id) {
            errors.push(format!("duplicate actionId '{action_id}'"));
        }

        if let Some(items) = &resource.items {
            if references_own_outputs(items, action_id) {
                errors.push(format!(
                    "resource '{action_id}': items expression references its own outputs"
                ));
            }
        }

        if mode == ValidationMode::Sandbox {
            validate_sandbox_resource(resource, &mut errors);
        }
    }

    // Dependency resolution and cycle detection reuse the execution-order
    // builder; its errors are already phrased for humans.
    if let Err(e) = graph::resolve_execution_order(&workflow.resources) {
        errors.push(e.to_json().message);
    }

    errors
}

/// Validates and converts the error list into a single fatal error.
///
/// # Errors
///
/// Returns an error when validation produced any findings.
pub fn ensure_valid(workflow: &Workflow, mode: ValidationMode) -> Result<(), Error> {
    let errors = validate_workflow(workflow, mode);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid_workflow(&errors))
    }
}

fn validate_sandbox_resource(resource: &Resource, errors: &mut Vec<String>) {
    let action_id = resource.action_id();
    match &resource.run {
        RunSpec::Exec(_) => errors.push(format!(
            "resource '{action_id}': {} is not supported in WASM builds",
            ResourceKind::Exec
        )),
        RunSpec::Python(_) => errors.push(format!(
            "resource '{action_id}': {} is not supported in WASM builds",
            ResourceKind::Python
        )),
        RunSpec::Chat(chat) => {
            let backend = chat.backend.as_deref().unwrap_or("openai");
            if constants::LOCAL_CHAT_BACKENDS.contains(&backend) {
                errors.push(format!(
                    "resource '{action_id}': local model backend '{backend}' is not supported in WASM builds; use one of: {}",
                    constants::ONLINE_CHAT_BACKENDS.join(", ")
                ));
            }
        }
        RunSpec::Http(_) | RunSpec::Sql(_) => {}
    }
}

/// Whether an iteration expression reads the outputs of the resource it
/// belongs to. Disallowed, since those outputs cannot exist yet.
fn references_own_outputs(items_expr: &str, action_id: &str) -> bool {
    graph::extract_output_references(items_expr)
        .iter()
        .any(|id| id == action_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::load_workflow;

    fn valid_yaml() -> &'static str {
        r"
metadata: {name: ok, targetActionId: fetch}
resources:
  - metadata: {actionId: fetch}
    run: {http: {url: 'http://example.com'}}
"
    }

    #[test]
    fn valid_workflow_passes() {
        let wf = load_workflow(valid_yaml()).unwrap();
        assert!(validate_workflow(&wf, ValidationMode::Full).is_empty());
        assert!(ensure_valid(&wf, ValidationMode::Full).is_ok());
    }

    #[test]
    fn missing_metadata_reported() {
        let wf = load_workflow(
            r"
metadata: {name: '', targetActionId: ''}
resources:
  - metadata: {actionId: a}
    run: {http: {url: 'http://example.com'}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Full);
        assert!(errors.iter().any(|e| e.contains("metadata.name")));
        assert!(errors.iter().any(|e| e.contains("targetActionId")));
    }

    #[test]
    fn dangling_target_reported() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: ghost}
resources:
  - metadata: {actionId: a}
    run: {http: {url: 'http://example.com'}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Full);
        assert!(errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn duplicate_action_ids_reported() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    run: {http: {url: 'http://example.com'}}
  - metadata: {actionId: a}
    run: {http: {url: 'http://example.com'}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Full);
        assert!(errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn cycle_reported() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    dependsOn: [b]
    run: {http: {url: 'http://example.com'}}
  - metadata: {actionId: b}
    dependsOn: [a]
    run: {http: {url: 'http://example.com'}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Full);
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn items_self_reference_rejected() {
        let wf = load_workflow(
            r#"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    items: "{{get('a').data}}"
    run: {http: {url: 'http://example.com'}}
"#,
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Full);
        assert!(errors
            .iter()
            .any(|e| e.contains("references its own outputs")));
    }

    #[test]
    fn sandbox_rejects_exec_and_python() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    run: {exec: {command: 'echo hi'}}
  - metadata: {actionId: b}
    run: {python: {script: 'print(1)'}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Sandbox);
        assert!(errors
            .iter()
            .any(|e| e == "resource 'a': exec is not supported in WASM builds"));
        assert!(errors
            .iter()
            .any(|e| e == "resource 'b': python is not supported in WASM builds"));
        // The same workflow passes in full mode
        assert!(validate_workflow(&wf, ValidationMode::Full).is_empty());
    }

    #[test]
    fn sandbox_rejects_local_chat_backends() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    run: {chat: {backend: ollama, model: llama3, prompt: hi}}
",
        )
        .unwrap();
        let errors = validate_workflow(&wf, ValidationMode::Sandbox);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("local model backend 'ollama'"));
        assert!(errors[0].contains("openai"));
    }

    #[test]
    fn sandbox_allows_online_chat_backends() {
        let wf = load_workflow(
            r"
metadata: {name: w, targetActionId: a}
resources:
  - metadata: {actionId: a}
    run: {chat: {backend: openai, model: gpt-4o-mini, prompt: hi}}
",
        )
        .unwrap();
        assert!(validate_workflow(&wf, ValidationMode::Sandbox).is_empty());
    }
}
