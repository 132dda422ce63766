//! Built-in function registry for the expression evaluator.
//!
//! The registry is fixed at scope construction; executors never extend it
//! mid-run. Functions receive already-evaluated arguments.

use super::parser::EvalScope;
use super::ExprError;
use serde_json::Value;
use std::collections::HashMap;

type BuiltinFn = fn(&EvalScope, &[Value]) -> Result<Value, ExprError>;

/// Name → implementation table for expression functions.
#[derive(Debug)]
pub struct FunctionRegistry {
    table: HashMap<&'static str, BuiltinFn>,
}

impl FunctionRegistry {
    /// The standard registry: `get`, `safe`, `default`, `json`.
    #[must_use]
    pub fn standard() -> Self {
        let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
        table.insert("get", builtin_get);
        table.insert("safe", builtin_safe);
        table.insert("default", builtin_default);
        table.insert("json", builtin_json);
        Self { table }
    }

    /// Invokes a registered function by name.
    ///
    /// # Errors
    ///
    /// Returns an unknown-function error for unregistered names, or
    /// whatever the function itself fails with.
    pub fn call(
        &self,
        scope: &EvalScope,
        name: &str,
        args: &[Value],
    ) -> Result<Value, ExprError> {
        let Some(f) = self.table.get(name) else {
            return Err(ExprError::unknown_function(name));
        };
        f(scope, args)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }
}

/// `get(key)`: looks up a completed resource's output by action id.
/// Missing keys evaluate to `null`.
fn builtin_get(scope: &EvalScope, args: &[Value]) -> Result<Value, ExprError> {
    let [Value::String(key)] = args else {
        return Err(ExprError::eval("get() takes a single string key"));
    };
    let outputs = scope.lookup("outputs");
    Ok(outputs.get(key).cloned().unwrap_or(Value::Null))
}

/// `safe(root, "a.b.c")`: null-safe traversal of a dotted path. Any
/// missing step yields `null` instead of failing.
fn builtin_safe(_scope: &EvalScope, args: &[Value]) -> Result<Value, ExprError> {
    let [root, Value::String(path)] = args else {
        return Err(ExprError::eval("safe() takes a value and a dotted path string"));
    };
    let mut current = root.clone();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if current.is_null() {
            return Ok(Value::Null);
        }
    }
    Ok(current)
}

/// `default(v, fallback)`: substitutes the fallback when the value is
/// null or an empty string.
fn builtin_default(_scope: &EvalScope, args: &[Value]) -> Result<Value, ExprError> {
    let [value, fallback] = args else {
        return Err(ExprError::eval("default() takes a value and a fallback"));
    };
    let empty = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    Ok(if empty { fallback.clone() } else { value.clone() })
}

/// `json(v)`: canonical JSON text of a value.
fn builtin_json(_scope: &EvalScope, args: &[Value]) -> Result<Value, ExprError> {
    let [value] = args else {
        return Err(ExprError::eval("json() takes a single value"));
    };
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| ExprError::eval(format!("json() serialization failed: {e}")))
}
