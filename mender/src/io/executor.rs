//! Isolated execution of submitted programs.
//!
//! The [`CodeExecutor`] trait decouples the repair loop from the actual
//! interpreter. [`SandboxExecutor`] runs each submission in a fresh temporary
//! directory under a generated bootstrap that installs the runtime guards
//! (memory ceiling, builtin removal, import hook) before the user's code runs.
//! Tests use scripted executors that return predetermined outcomes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, error, info, instrument, warn};

use crate::core::policy::CapabilityPolicy;
use crate::core::types::{ExecutionLimits, ExecutionOutcome, ExecutionStatus};
use crate::io::config::{RepairConfig, SandboxConfig};
use crate::io::process::run_command_with_timeout;

const BOOTSTRAP_TEMPLATE: &str = include_str!("templates/bootstrap.py");

/// Name under which the submitted program is compiled; tracebacks refer to it.
pub const USER_BUFFER_NAME: &str = "<sandbox>";

const PROGRAM_FILE: &str = "main.py";
const BOOTSTRAP_FILE: &str = "bootstrap.py";
const GUARD_STATUS_FILE: &str = "guard_status";

/// Abstraction over program execution backends.
///
/// Implementations never fail: infrastructure problems are reported as an
/// [`ExecutionStatus::InternalError`] outcome.
pub trait CodeExecutor {
    fn execute(&self, code: &str, limits: &ExecutionLimits) -> ExecutionOutcome;
}

/// Executor that runs programs under the host Python interpreter.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    interpreter: String,
    output_limit_bytes: usize,
    temp_dir: Option<PathBuf>,
    policy: CapabilityPolicy,
}

impl SandboxExecutor {
    pub fn new(sandbox: &SandboxConfig, policy: &CapabilityPolicy) -> Self {
        Self {
            interpreter: sandbox.interpreter.clone(),
            output_limit_bytes: sandbox.output_limit_bytes,
            temp_dir: sandbox.temp_dir.clone(),
            policy: policy.clone(),
        }
    }

    pub fn from_config(cfg: &RepairConfig) -> Self {
        Self::new(&cfg.sandbox, &cfg.policy)
    }

    fn run(&self, code: &str, limits: &ExecutionLimits) -> Result<ExecutionOutcome> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mender-");
        let workdir = match &self.temp_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("create sandbox directory")?;
        let root = workdir.path();
        let program_path = root.join(PROGRAM_FILE);
        let bootstrap_path = root.join(BOOTSTRAP_FILE);
        let status_path = root.join(GUARD_STATUS_FILE);

        fs::write(&program_path, code)
            .with_context(|| format!("write sandbox program {}", program_path.display()))?;
        let bootstrap = render_bootstrap(&self.policy, limits.memory_limit_bytes)?;
        fs::write(&bootstrap_path, bootstrap)
            .with_context(|| format!("write sandbox bootstrap {}", bootstrap_path.display()))?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg("-B")
            .arg(&bootstrap_path)
            .arg(&program_path)
            .arg(&status_path)
            .current_dir(root)
            .env_clear();
        if let Some(path) = env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let output =
            run_command_with_timeout(cmd, None, limits.timeout, self.output_limit_bytes)
                .with_context(|| format!("run interpreter {}", self.interpreter))?;

        let memory_limit_enforced = read_guard_status(&status_path);
        let elapsed_ms = output.elapsed.as_millis() as u64;

        let outcome = if output.timed_out {
            ExecutionOutcome {
                status: ExecutionStatus::Timeout,
                stdout: String::new(),
                stderr: timeout_message(limits),
                exit_code: ExecutionOutcome::TIMEOUT_EXIT_CODE,
                elapsed_ms,
                memory_limit_enforced,
            }
        } else {
            let exit_code = output.exit_code();
            ExecutionOutcome {
                status: if exit_code == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::RuntimeError
                },
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                exit_code,
                elapsed_ms,
                memory_limit_enforced,
            }
        };

        if let Err(err) = workdir.close() {
            warn!(err = %err, "failed to remove sandbox directory");
        }
        Ok(outcome)
    }
}

impl CodeExecutor for SandboxExecutor {
    #[instrument(skip_all, fields(code_len = code.len(), timeout_ms = limits.timeout.as_millis() as u64, memory_limit_bytes = limits.memory_limit_bytes))]
    fn execute(&self, code: &str, limits: &ExecutionLimits) -> ExecutionOutcome {
        let started = Instant::now();
        match self.run(code, limits) {
            Ok(outcome) => {
                if !outcome.memory_limit_enforced && outcome.status != ExecutionStatus::Timeout {
                    warn!("memory limit could not be applied, running degraded");
                }
                info!(status = ?outcome.status, exit_code = outcome.exit_code, elapsed_ms = outcome.elapsed_ms, "execution finished");
                outcome
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "sandbox infrastructure failure");
                ExecutionOutcome::internal_error(
                    format!("{err:#}"),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}

fn timeout_message(limits: &ExecutionLimits) -> String {
    format!(
        "Execution timed out after {} second(s) (possible infinite loop)",
        limits.timeout.as_secs_f64()
    )
}

fn read_guard_status(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(status) => status.trim() == "enforced",
        Err(err) => {
            debug!(err = %err, "guard status marker missing");
            false
        }
    }
}

/// Render the interpreter bootstrap that installs the runtime guards.
pub fn render_bootstrap(policy: &CapabilityPolicy, memory_limit_bytes: u64) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(BOOTSTRAP_FILE, BOOTSTRAP_TEMPLATE)
        .context("load bootstrap template")?;
    let template = env.get_template(BOOTSTRAP_FILE)?;
    let rendered = template
        .render(context! {
            forbidden_imports => python_frozenset(policy.forbidden_imports.iter()),
            forbidden_builtins => python_frozenset(policy.forbidden_builtins.iter()),
            memory_limit_bytes => memory_limit_bytes,
            filename => USER_BUFFER_NAME,
        })
        .context("render bootstrap template")?;
    Ok(rendered)
}

/// Python `frozenset` literal holding `names`.
fn python_frozenset<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let items: Vec<String> = names.map(|name| format!("{name:?}")).collect();
    if items.is_empty() {
        "frozenset()".to_string()
    } else {
        format!("frozenset({{{}}})", items.join(", "))
    }
}
