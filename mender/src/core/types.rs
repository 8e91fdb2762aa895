//! Shared deterministic types for the repair pipeline.
//!
//! These types define stable contracts between the validator, executor,
//! classifier, patch generator and orchestrator. All of them serialize to JSON
//! so the CLI and the HTTP layer can emit them unchanged.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of static policy vetting. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    /// Human-readable violations in source order.
    pub violations: Vec<String>,
}

impl PolicyDecision {
    pub(crate) fn from_violations(violations: Vec<String>) -> Self {
        Self {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

/// Resource bounds applied to a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    Timeout,
    InternalError,
}

/// Captured result of one isolated execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    /// `false` when the host could not apply the memory ceiling (degraded mode).
    pub memory_limit_enforced: bool,
}

impl ExecutionOutcome {
    /// Exit code reported for a run killed by the wall-clock limit.
    pub const TIMEOUT_EXIT_CODE: i32 = 124;
    /// Exit code reported when the executor itself failed.
    pub const INTERNAL_EXIT_CODE: i32 = -1;

    pub fn internal_error(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::InternalError,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: Self::INTERNAL_EXIT_CODE,
            elapsed_ms,
            memory_limit_enforced: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Render a short human-readable report of the run.
    pub fn summary(&self) -> String {
        let status = match self.status {
            ExecutionStatus::Success => "success",
            ExecutionStatus::RuntimeError => "runtime error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::InternalError => "internal error",
        };
        let mut out = format!(
            "Status: {status}\nExit code: {}\nTime: {:.3}s\n",
            self.exit_code,
            self.elapsed_ms as f64 / 1000.0
        );
        if !self.memory_limit_enforced {
            out.push_str("Memory limit: not enforced\n");
        }
        if !self.stdout.trim().is_empty() {
            out.push_str("\nOutput:\n");
            out.push_str(self.stdout.trim_end());
            out.push('\n');
        }
        if !self.stderr.trim().is_empty() {
            out.push_str("\nError:\n");
            out.push_str(self.stderr.trim_end());
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Runtime,
}

/// Structured view of a failure extracted from diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
    /// 1-based line in the submitted program, when known.
    pub line_number: Option<u32>,
    pub source_location: Option<String>,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    Heuristic,
    Advisor,
}

/// A proposed rewrite of the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub unified_diff: String,
    pub rewritten_code: String,
    pub rationale: String,
    /// In `[0.0, 1.0]`. Exactly `0.0` means no applicable fix.
    pub confidence: f64,
    pub source: PatchSource,
}

impl PatchCandidate {
    pub const NO_FIX_RATIONALE: &'static str = "No fix strategy found for this error.";

    /// Candidate that leaves `code` untouched and signals "no fix".
    pub fn no_fix(code: &str, source: PatchSource) -> Self {
        Self {
            unified_diff: String::new(),
            rewritten_code: code.to_string(),
            rationale: Self::NO_FIX_RATIONALE.to_string(),
            confidence: 0.0,
            source,
        }
    }

    pub fn is_no_fix(&self) -> bool {
        self.confidence <= 0.0
    }
}

/// One attempt within a repair session. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairIteration {
    /// 1-based attempt number.
    pub index: u32,
    pub code_at_start: String,
    pub outcome: ExecutionOutcome,
    pub error: Option<ErrorDescriptor>,
    pub candidate: Option<PatchCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Fixed,
    Exhausted,
    Rejected,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Fixed => "fixed",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Rejected => "rejected",
        }
    }
}

/// Full record of one repair request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSession {
    pub session_id: String,
    pub original_code: String,
    /// Code as of the last adopted patch; the final code once terminal.
    pub current_code: String,
    pub policy: Option<PolicyDecision>,
    pub iterations: Vec<RepairIteration>,
    pub repaired: bool,
    pub status: SessionStatus,
    /// Set when the session ended because a component failed.
    pub failure: Option<String>,
    pub total_iterations: u32,
}
