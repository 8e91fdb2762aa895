//! Test doubles and fixtures for the repair pipeline.

use std::collections::VecDeque;
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ExecutionLimits, ExecutionOutcome, ExecutionStatus};
use crate::io::advisor::Advisor;
use crate::io::executor::CodeExecutor;

/// Whether `python3` can be spawned on this host.
pub fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

pub fn success(stdout: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecutionStatus::Success,
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
        elapsed_ms: 5,
        memory_limit_enforced: true,
    }
}

/// Failed run whose stderr is a traceback pointing at `line` of the user buffer.
pub fn runtime_error(line: u32, last_line: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecutionStatus::RuntimeError,
        stdout: String::new(),
        stderr: format!(
            "Traceback (most recent call last):\n  File \"<sandbox>\", line {line}, in <module>\n{last_line}\n"
        ),
        exit_code: 1,
        elapsed_ms: 5,
        memory_limit_enforced: true,
    }
}

pub fn timeout() -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecutionStatus::Timeout,
        stdout: String::new(),
        stderr: "Execution timed out after 1 second(s) (possible infinite loop)".to_string(),
        exit_code: ExecutionOutcome::TIMEOUT_EXIT_CODE,
        elapsed_ms: 1000,
        memory_limit_enforced: true,
    }
}

pub fn limits() -> ExecutionLimits {
    ExecutionLimits {
        timeout: Duration::from_secs(5),
        memory_limit_bytes: 100 * 1024 * 1024,
    }
}

/// Executor that replays outcomes in order and records the code it was given.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Programs passed to `execute`, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl CodeExecutor for ScriptedExecutor {
    fn execute(&self, code: &str, _limits: &ExecutionLimits) -> ExecutionOutcome {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(code.to_string());
        }
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| ExecutionOutcome::internal_error("scripted executor exhausted", 0))
    }
}

/// Executor that panics, for exercising fault containment.
#[derive(Debug, Default)]
pub struct PanickingExecutor;

impl CodeExecutor for PanickingExecutor {
    fn execute(&self, _code: &str, _limits: &ExecutionLimits) -> ExecutionOutcome {
        panic!("executor blew up");
    }
}

/// Advisor that replays canned replies (or a fixed failure) and records prompts.
#[derive(Debug, Default)]
pub struct ScriptedAdvisor {
    replies: Mutex<VecDeque<String>>,
    failure: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAdvisor {
    pub fn replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Advisor for ScriptedAdvisor {
    fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| anyhow!("scripted advisor exhausted"))
    }
}
