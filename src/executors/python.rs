//! Python script executor.
//!
//! Delegates to the shell machinery: the script body interpolates
//! leniently (failing fragments stay textual) and runs through the
//! `python3` interpreter with the same process-group and timeout
//! treatment as the shell executor, yielding the same result shape.

use crate::engine::context::ExecutionContext;
use crate::engine::registry::Executor;
use crate::error::Error;
use crate::executors::{eval_field, exec};
use crate::expr;
use crate::workflow::{PythonConfig, ResourceKind, RunSpec};
use async_trait::async_trait;
use serde_json::Value;

const PYTHON_INTERPRETER: &str = "python3";

pub struct PythonExecutor;

#[async_trait]
impl Executor for PythonExecutor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Python
    }

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error> {
        let RunSpec::Python(config) = run else {
            return Err(Error::invalid_config_type("python"));
        };
        execute_python(ctx, config).await
    }
}

async fn execute_python(ctx: &ExecutionContext, config: &PythonConfig) -> Result<Value, Error> {
    let scope = ctx.expression_scope();
    let script = expr::render_template_lenient(&config.script, &scope);

    let mut env = Vec::with_capacity(config.env.len());
    for (name, value) in &config.env {
        let evaluated = eval_field(value, &scope, &format!("env '{name}'"))?;
        env.push((name.clone(), evaluated));
    }

    let timeout = config
        .timeout_duration
        .as_deref()
        .map(crate::duration::parse_duration)
        .transpose()?;

    // `python3 -c <script>` through the interpreter directly; the shell is
    // not involved, so no quoting of the script body is needed here.
    run_interpreter(&script, &env, ctx.fs_root.clone(), timeout).await
}

async fn run_interpreter(
    script: &str,
    env: &[(String, String)],
    working_dir: Option<std::path::PathBuf>,
    timeout: Option<std::time::Duration>,
) -> Result<Value, Error> {
    // Reuses the shell runner with `python3` standing in for the shell:
    // both accept `-c <text>` and share the group-kill timeout contract.
    exec::run_script(PYTHON_INTERPRETER, script, env, working_dir, timeout).await
}
