//! Per-kind resource executors.
//!
//! Every executor satisfies the registry's adapter contract: take the
//! execution context and the opaque `RunSpec` payload, assert it into the
//! typed configuration for its kind, evaluate expression-bearing fields,
//! do the side-effecting work, and shape a result map. The HTTP executor
//! carries the full resolve → auth → cache → transport → retry → shape
//! pipeline; SQL and chat follow the same discipline over their own
//! transports.

pub mod cache;
pub mod chat;
pub mod exec;
pub mod http;
pub mod python;
pub mod retry;
pub mod sql;

pub use chat::ChatExecutor;
pub use exec::ExecExecutor;
pub use http::HttpExecutor;
pub use python::PythonExecutor;
pub use sql::SqlExecutor;

use crate::error::Error;
use crate::expr::{self, EvalScope};

/// Evaluates a required expression-bearing field, naming the field in the
/// failure message.
pub(crate) fn eval_field(value: &str, scope: &EvalScope, field: &str) -> Result<String, Error> {
    expr::render_template(value, scope)
        .map_err(|e| Error::field_evaluation(field, e.to_json().message))
}

/// Evaluates an optional expression-bearing field.
pub(crate) fn eval_opt_field(
    value: Option<&str>,
    scope: &EvalScope,
    field: &str,
) -> Result<Option<String>, Error> {
    value.map(|v| eval_field(v, scope, field)).transpose()
}
