//! Shell command executor.
//!
//! Runs a script through the system shell in its own process group.
//! `{{…}}` fragments inside the script interpolate leniently (a fragment
//! that fails to parse or evaluate passes through textually) and every
//! substituted value is shell-quoted. `timeoutDuration` kills the process
//! group on expiry; a timeout or nonzero exit is result-map data, not an
//! engine-level error.

use crate::constants;
use crate::duration::parse_duration;
use crate::engine::context::ExecutionContext;
use crate::engine::registry::Executor;
use crate::error::Error;
use crate::executors::eval_field;
use crate::expr;
use crate::workflow::{ResourceKind, RunSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_SHELL: &str = "/bin/sh";

pub struct ExecExecutor;

#[async_trait]
impl Executor for ExecExecutor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Exec
    }

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error> {
        let RunSpec::Exec(config) = run else {
            return Err(Error::invalid_config_type("exec"));
        };
        let scope = ctx.expression_scope();
        let script = expr::render_template_shell(&config.command, &scope);
        let shell = config
            .shell
            .clone()
            .unwrap_or_else(|| DEFAULT_SHELL.to_string());

        let mut env = Vec::with_capacity(config.env.len());
        for (name, value) in &config.env {
            let evaluated = eval_field(value, &scope, &format!("env '{name}'"))?;
            env.push((name.clone(), evaluated));
        }

        let working_dir = resolve_working_dir(config.working_dir.as_deref(), ctx);
        let timeout = config
            .timeout_duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        run_script(&shell, &script, &env, working_dir, timeout).await
    }
}

fn resolve_working_dir(configured: Option<&str>, ctx: &ExecutionContext) -> Option<PathBuf> {
    configured.map_or_else(
        || ctx.fs_root.clone(),
        |dir| Some(PathBuf::from(shellexpand::tilde(dir).into_owned())),
    )
}

/// Spawns `shell -c script` and shapes the outcome. The child becomes a
/// process group leader so a timeout can take the whole group down.
pub(crate) async fn run_script(
    shell: &str,
    script: &str,
    env: &[(String, String)],
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
) -> Result<Value, Error> {
    let mut command = Command::new(shell);
    command
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (name, value) in env {
        command.env(name, value);
    }
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    debug!(%shell, "spawning script");
    let child = command
        .spawn()
        .map_err(|e| Error::execution_error(format!("failed to spawn '{shell}': {e}")))?;
    let pid = child.id();

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                kill_process_group(pid);
                debug!(?pid, "script timed out, process group killed");
                return Ok(json!({
                    constants::RESULT_KEY_SUCCESS: false,
                    constants::RESULT_KEY_EXIT_CODE: -1,
                    constants::RESULT_KEY_STDOUT: "",
                    constants::RESULT_KEY_STDERR: "",
                    constants::RESULT_KEY_TIMED_OUT: true,
                    constants::RESULT_KEY_RESULT: "",
                }));
            }
        },
        None => child.wait_with_output().await,
    };

    let output = waited.map_err(|e| Error::execution_error(format!("wait failed: {e}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code().unwrap_or(-1);

    Ok(json!({
        constants::RESULT_KEY_SUCCESS: output.status.success(),
        constants::RESULT_KEY_EXIT_CODE: exit_code,
        constants::RESULT_KEY_STDOUT: stdout,
        constants::RESULT_KEY_STDERR: stderr,
        constants::RESULT_KEY_TIMED_OUT: false,
        constants::RESULT_KEY_RESULT: stdout,
    }))
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child called setsid, so its pid is the group id.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {
    // kill_on_drop takes the direct child down when the wait future drops.
}
