//! Dependency resolution and execution ordering.
//!
//! Resources form a directed graph: explicit `dependsOn` edges plus
//! implicit edges inferred from `get('id')` / `outputs.id` references in
//! `{{…}}` configuration fragments. This module checks id uniqueness,
//! resolves references, and schedules resources by repeatedly selecting
//! the earliest-declared resource whose predecessors have all run. A
//! round with no selectable resource means a cycle, reported by action id.

use crate::error::Error;
use crate::workflow::Resource;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Result of dependency resolution: an ordered list of resource indices.
pub type ExecutionOrder = Vec<usize>;

/// Validates resource identities and returns a topological execution order.
///
/// # Validation rules
///
/// 1. Action ids must be unique within the workflow.
/// 2. Every `dependsOn` reference must name an existing action id.
/// 3. Implicit dependencies are inferred from `get('id')` and `outputs.id`
///    references inside configuration expressions.
/// 4. The resulting graph must be acyclic.
///
/// # Errors
///
/// Returns an error if any rule is violated or a cycle is detected.
pub fn resolve_execution_order(resources: &[Resource]) -> Result<ExecutionOrder, Error> {
    let index = index_action_ids(resources)?;
    let predecessors = collect_predecessors(resources, &index)?;
    schedule(resources, &predecessors)
}

/// Maps each action id to its declaration position, rejecting duplicates.
fn index_action_ids(resources: &[Resource]) -> Result<HashMap<&str, usize>, Error> {
    let mut index = HashMap::with_capacity(resources.len());
    for (position, resource) in resources.iter().enumerate() {
        match index.entry(resource.action_id()) {
            Entry::Vacant(slot) => {
                slot.insert(position);
            }
            Entry::Occupied(first) => {
                return Err(Error::duplicate_action_id(
                    resource.action_id(),
                    *first.get(),
                    position,
                ));
            }
        }
    }
    Ok(index)
}

/// Extracts output references (`get('id')`, `get("id")`, `outputs.id`)
/// from `{{…}}` fragments of a configuration string.
pub(crate) fn extract_output_references(s: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut remaining = s;
    while let Some(start) = remaining.find("{{") {
        let after_open = &remaining[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        collect_refs_from_fragment(&after_open[..end], &mut refs);
        remaining = &after_open[end + 2..];
    }
    refs
}

fn collect_refs_from_fragment(fragment: &str, refs: &mut Vec<String>) {
    // get('id') / get("id")
    let mut rest = fragment;
    while let Some(pos) = rest.find("get(") {
        let after = rest[pos + 4..].trim_start();
        if let Some(quote) = after.chars().next().filter(|&c| c == '\'' || c == '"') {
            if let Some(close) = after[1..].find(quote) {
                let id = &after[1..=close];
                if !id.is_empty() {
                    refs.push(id.to_string());
                }
            }
        }
        rest = &rest[pos + 4..];
    }

    // outputs.id
    let mut rest = fragment;
    while let Some(pos) = rest.find("outputs.") {
        let after = &rest[pos + 8..];
        let id: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !id.is_empty() {
            refs.push(id);
        }
        rest = &rest[pos + 8..];
    }
    refs.dedup();
}

/// Collects every configuration string of a resource (the `items`
/// expression included) for implicit-reference scanning.
fn config_strings(resource: &Resource) -> Vec<String> {
    let mut strings = Vec::new();
    if let Some(items) = &resource.items {
        strings.push(items.clone());
    }
    if let Ok(value) = serde_json::to_value(&resource.run) {
        collect_strings(&value, &mut strings);
    }
    strings
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            for inner in map.values() {
                collect_strings(inner, out);
            }
        }
        serde_json::Value::Array(items) => {
            for inner in items {
                collect_strings(inner, out);
            }
        }
        _ => {}
    }
}

/// Computes each resource's predecessor set: explicit `dependsOn` targets
/// (unknown ids are errors) plus implicit output references (unknown ids
/// are left to evaluate to null at runtime, and self-references carry no
/// edge).
fn collect_predecessors(
    resources: &[Resource],
    index: &HashMap<&str, usize>,
) -> Result<Vec<HashSet<usize>>, Error> {
    let mut predecessors = Vec::with_capacity(resources.len());

    for (position, resource) in resources.iter().enumerate() {
        let mut preds = HashSet::new();

        for dep_id in resource.depends_on.iter().flatten() {
            match index.get(dep_id.as_str()) {
                Some(&target) => {
                    preds.insert(target);
                }
                None => return Err(Error::missing_dependency(resource.action_id(), dep_id)),
            }
        }

        for referenced in config_strings(resource)
            .iter()
            .flat_map(|s| extract_output_references(s))
        {
            if let Some(&target) = index.get(referenced.as_str()) {
                if target != position {
                    preds.insert(target);
                }
            }
        }

        predecessors.push(preds);
    }

    Ok(predecessors)
}

/// Orders resources by repeated selection: each round takes the
/// earliest-declared resource all of whose predecessors are already
/// scheduled, so independent resources keep their source order. When no
/// resource qualifies, whatever remains is cyclic.
fn schedule(
    resources: &[Resource],
    predecessors: &[HashSet<usize>],
) -> Result<ExecutionOrder, Error> {
    let total = resources.len();
    let mut placed = vec![false; total];
    let mut order = Vec::with_capacity(total);

    while order.len() < total {
        let ready = (0..total).find(|&candidate| {
            !placed[candidate] && predecessors[candidate].iter().all(|&p| placed[p])
        });
        match ready {
            Some(candidate) => {
                placed[candidate] = true;
                order.push(candidate);
            }
            None => {
                let stuck: Vec<String> = placed
                    .iter()
                    .enumerate()
                    .filter(|(_, done)| !**done)
                    .map(|(i, _)| resources[i].action_id().to_string())
                    .collect();
                return Err(Error::cycle_detected(&stuck));
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ExecConfig, HttpConfig, Resource, ResourceMetadata, RunSpec};

    fn res(id: &str) -> Resource {
        Resource {
            metadata: ResourceMetadata {
                action_id: id.to_string(),
            },
            depends_on: None,
            items: None,
            run: RunSpec::Exec(ExecConfig {
                command: "true".to_string(),
                ..ExecConfig::default()
            }),
        }
    }

    fn res_with_deps(id: &str, deps: &[&str]) -> Resource {
        let mut r = res(id);
        r.depends_on = Some(deps.iter().map(|s| (*s).to_string()).collect());
        r
    }

    fn res_with_url(id: &str, url: &str) -> Resource {
        let mut r = res(id);
        r.run = RunSpec::Http(HttpConfig {
            url: url.to_string(),
            ..HttpConfig::default()
        });
        r
    }

    #[test]
    fn no_dependencies_preserves_original_order() {
        let resources = vec![res("a"), res("b"), res("c")];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn explicit_linear_chain() {
        let resources = vec![
            res("create"),
            res_with_deps("get", &["create"]),
            res_with_deps("delete", &["get"]),
        ];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn explicit_fan_in() {
        let resources = vec![res("a"), res("b"), res_with_deps("c", &["a", "b"])];
        let order = resolve_execution_order(&resources).unwrap();
        let pos = |idx: usize| order.iter().position(|&x| x == idx).unwrap();
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn dependent_declared_first_still_runs_second() {
        let resources = vec![res_with_deps("late", &["early"]), res("early")];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn implicit_dependency_from_get_reference() {
        let resources = vec![
            res("token"),
            res_with_url("call", "http://srv/items?t={{get('token')}}"),
        ];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn implicit_dependency_from_outputs_reference() {
        let resources = vec![
            res_with_url("call", "http://srv/{{outputs.seed.data.id}}"),
            res("seed"),
        ];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn cycle_detection_reports_action_ids() {
        let resources = vec![res_with_deps("a", &["b"]), res_with_deps("b", &["a"])];
        let err = resolve_execution_order(&resources).unwrap_err().to_string();
        assert!(err.contains("cycle"), "expected cycle error, got: {err}");
        assert!(err.contains('a') && err.contains('b'));
    }

    #[test]
    fn cycle_detection_three_nodes() {
        let resources = vec![
            res_with_deps("a", &["c"]),
            res_with_deps("b", &["a"]),
            res_with_deps("c", &["b"]),
        ];
        assert!(resolve_execution_order(&resources).is_err());
    }

    #[test]
    fn cycle_error_excludes_resources_outside_the_cycle() {
        let resources = vec![
            res("clean"),
            res_with_deps("a", &["b"]),
            res_with_deps("b", &["a"]),
        ];
        let err = resolve_execution_order(&resources).unwrap_err().to_string();
        assert!(!err.contains("clean"), "got: {err}");
    }

    #[test]
    fn missing_dependency_reference() {
        let resources = vec![res("a"), res_with_deps("b", &["nonexistent"])];
        let err = resolve_execution_order(&resources).unwrap_err().to_string();
        assert!(err.contains("nonexistent"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let resources = vec![res("dup"), res("dup")];
        let err = resolve_execution_order(&resources).unwrap_err().to_string();
        assert!(err.contains("duplicate action id 'dup'"));
    }

    #[test]
    fn self_reference_in_config_carries_no_edge() {
        let resources = vec![res_with_url("solo", "http://srv/{{get('solo')}}")];
        let order = resolve_execution_order(&resources).unwrap();
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn diamond_dependency() {
        let resources = vec![
            res("a"),
            res_with_deps("b", &["a"]),
            res_with_deps("c", &["a"]),
            res_with_deps("d", &["b", "c"]),
        ];
        let order = resolve_execution_order(&resources).unwrap();
        let pos = |idx: usize| order.iter().position(|&x| x == idx).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn extract_references_basic() {
        let refs = extract_output_references("{{get('user')}}");
        assert_eq!(refs, vec!["user"]);
    }

    #[test]
    fn extract_references_double_quoted_and_outputs() {
        let refs = extract_output_references(r#"{{get("a")}} and {{outputs.b-2.x}}"#);
        assert_eq!(refs, vec!["a", "b-2"]);
    }

    #[test]
    fn extract_references_ignores_text_outside_fragments() {
        let refs = extract_output_references("get('not-a-fragment')");
        assert!(refs.is_empty());
    }

    #[test]
    fn extract_references_unclosed_fragment() {
        let refs = extract_output_references("{{get('x'");
        assert!(refs.is_empty());
    }
}
