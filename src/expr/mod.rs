//! Expression evaluation surface consumed by the executors.
//!
//! Configuration strings may interleave literal text with `{{…}}`
//! fragments. Three cases apply to each string field:
//!
//! 1. No `{{` present: the string is literal and used as-is.
//! 2. Exactly one fragment spanning the whole string: the fragment is
//!    parsed and evaluated, and the result converted to a string by
//!    default formatting (numbers unquoted, booleans `true`/`false`,
//!    structured values as JSON text).
//! 3. Mixed literal and fragments: each fragment's stringified value is
//!    substituted in place; fragments that fail to parse or name an
//!    unknown function stay textually intact.
//!
//! Structured payloads evaluate recursively: a leaf string that is exactly
//! one full fragment evaluates to its *typed* value, other fragment-bearing
//! leaves substitute as templates, and non-string leaves pass through.

pub mod functions;
pub mod parser;

pub use parser::{evaluate, parse, EvalScope, Expr};

use crate::error::Error;
use serde_json::Value;

/// Failure raised while parsing or evaluating a single expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprError {
    pub kind: ExprErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprErrorKind {
    /// Malformed fragment source.
    Parse,
    /// Call to a function the registry does not know.
    UnknownFunction,
    /// Well-formed fragment whose evaluation failed.
    Eval,
}

impl ExprError {
    /// Whether template rendering leaves the offending fragment textual
    /// instead of failing (malformed source and unknown functions do;
    /// genuine evaluation failures do not).
    #[must_use]
    pub const fn leaves_fragment_textual(&self) -> bool {
        matches!(self.kind, ExprErrorKind::Parse | ExprErrorKind::UnknownFunction)
    }
}

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ExprError> for Error {
    fn from(e: ExprError) -> Self {
        Self::expression_eval(e.message)
    }
}

/// Default string formatting for evaluated values: strings unquoted,
/// numbers and booleans via their display form, null as the empty string,
/// structured values as JSON text.
#[must_use]
pub fn stringify(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Returns the inner source when the string is exactly one `{{…}}`
/// fragment spanning the whole string.
#[must_use]
pub fn single_fragment(s: &str) -> Option<&str> {
    if !s.starts_with("{{") || !s.ends_with("}}") || s.len() < 4 {
        return None;
    }
    let inner = &s[2..s.len() - 2];
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// Parses and evaluates a whole string as one expression.
///
/// # Errors
///
/// Propagates parse and evaluation failures.
pub fn evaluate_expression(src: &str, scope: &EvalScope) -> Result<Value, ExprError> {
    let expr = parse(src)?;
    evaluate(&expr, scope)
}

/// Renders a template string strictly: fragments that fail to parse or
/// name an unknown function stay textual, but evaluation failures (and any
/// failure in a whole-string fragment) propagate.
///
/// # Errors
///
/// Returns an error when a fragment's evaluation fails.
pub fn render_template(input: &str, scope: &EvalScope) -> Result<String, Error> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }
    if let Some(frag) = single_fragment(input) {
        let v = evaluate_expression(frag, scope)?;
        return Ok(stringify(&v));
    }
    render_fragments(input, scope, Substitution::Strict)
}

/// Renders a template leniently: every failing fragment stays textual.
/// Used for in-script interpolation where a literal `{{…}}` passing
/// through is preferable to failing the resource.
#[must_use]
pub fn render_template_lenient(input: &str, scope: &EvalScope) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    render_fragments(input, scope, Substitution::Lenient)
        .unwrap_or_else(|_| input.to_string())
}

/// Lenient rendering with shell quoting applied to each substituted value:
/// wrapped in single quotes, embedded single quotes escaped as `'\''`,
/// empty strings as `''`.
#[must_use]
pub fn render_template_shell(input: &str, scope: &EvalScope) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    render_fragments(input, scope, Substitution::Shell)
        .unwrap_or_else(|_| input.to_string())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Substitution {
    Strict,
    Lenient,
    Shell,
}

fn render_fragments(
    input: &str,
    scope: &EvalScope,
    mode: Substitution,
) -> Result<String, Error> {
    let mut out = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find("{{") {
        out.push_str(&remaining[..start]);
        let after_open = &remaining[start + 2..];

        let Some(end) = after_open.find("}}") else {
            // Unclosed brace, treat as literal
            out.push_str("{{");
            remaining = after_open;
            continue;
        };

        let frag = &after_open[..end];
        match evaluate_expression(frag, scope) {
            Ok(v) => {
                let text = stringify(&v);
                if mode == Substitution::Shell {
                    out.push_str(&shell_quote(&text));
                } else {
                    out.push_str(&text);
                }
            }
            Err(e) if mode != Substitution::Strict || e.leaves_fragment_textual() => {
                out.push_str("{{");
                out.push_str(frag);
                out.push_str("}}");
            }
            Err(e) => return Err(e.into()),
        }
        remaining = &after_open[end + 2..];
    }

    out.push_str(remaining);
    Ok(out)
}

/// Single-quotes a string for safe splicing into a shell script. Embedded
/// single quotes become `'\''`; the empty string becomes `''`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Recursively evaluates a structured payload (request body, SQL params).
/// Leaf strings that are exactly one fragment evaluate to their typed
/// value; other fragment-bearing strings render as templates; everything
/// else passes through unchanged.
///
/// # Errors
///
/// Propagates parse and evaluation failures from leaf strings.
pub fn evaluate_value(v: &Value, scope: &EvalScope) -> Result<Value, Error> {
    match v {
        Value::String(s) => {
            if let Some(frag) = single_fragment(s) {
                let value = evaluate_expression(frag, scope)?;
                Ok(value)
            } else if s.contains("{{") {
                render_template(s, scope).map(Value::String)
            } else {
                Ok(v.clone())
            }
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, inner) in map {
                out.insert(k.clone(), evaluate_value(inner, scope)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for inner in items {
                out.push(evaluate_value(inner, scope)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}
