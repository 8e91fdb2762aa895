//! Admission of user submissions.
//!
//! A [`Submission`] is what arrives over the CLI or HTTP boundary. It becomes a
//! [`SubmittedProgram`] only after passing the size and limit checks; values
//! above the configured ceilings are clamped rather than rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::types::ExecutionLimits;
use crate::io::config::LimitsConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Raw request to run or repair a program. Omitted limits use configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub code: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl Submission {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout_secs: None,
            memory_limit_mb: None,
            max_iterations: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("code must not be empty")]
    EmptyCode,
    #[error("code is {len} bytes, limit is {max}")]
    CodeTooLong { len: usize, max: usize },
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
}

/// A validated, immutable program plus the limits it runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedProgram {
    code: String,
    limits: ExecutionLimits,
    max_iterations: u32,
}

impl SubmittedProgram {
    pub fn from_submission(
        submission: &Submission,
        cfg: &LimitsConfig,
    ) -> Result<Self, SubmissionError> {
        check_code(&submission.code, cfg)?;
        let timeout_secs = bounded(
            "timeout_secs",
            submission.timeout_secs.unwrap_or(cfg.default_timeout_secs),
            cfg.max_timeout_secs,
        )?;
        let memory_mb = bounded(
            "memory_limit_mb",
            submission.memory_limit_mb.unwrap_or(cfg.default_memory_mb),
            cfg.max_memory_mb,
        )?;
        let max_iterations = bounded(
            "max_iterations",
            u64::from(
                submission
                    .max_iterations
                    .unwrap_or(cfg.default_max_iterations),
            ),
            u64::from(cfg.max_iterations),
        )?;

        Ok(Self {
            code: submission.code.clone(),
            limits: ExecutionLimits {
                timeout: Duration::from_secs(timeout_secs),
                memory_limit_bytes: memory_mb.saturating_mul(BYTES_PER_MB),
            },
            max_iterations: u32::try_from(max_iterations).unwrap_or(u32::MAX),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

/// Emptiness and size checks shared by every entry point that takes code.
pub fn check_code(code: &str, cfg: &LimitsConfig) -> Result<(), SubmissionError> {
    if code.trim().is_empty() {
        return Err(SubmissionError::EmptyCode);
    }
    if code.len() > cfg.max_code_length {
        return Err(SubmissionError::CodeTooLong {
            len: code.len(),
            max: cfg.max_code_length,
        });
    }
    Ok(())
}

fn bounded(field: &'static str, value: u64, max: u64) -> Result<u64, SubmissionError> {
    if value == 0 {
        return Err(SubmissionError::NotPositive { field });
    }
    if value > max {
        debug!(field, requested = value, max, "clamping submission limit");
        return Ok(max);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_limits_are_omitted() {
        let program =
            SubmittedProgram::from_submission(&Submission::new("print(1)"), &LimitsConfig::default())
                .expect("admit");
        assert_eq!(program.code(), "print(1)");
        assert_eq!(program.limits().timeout, Duration::from_secs(5));
        assert_eq!(program.limits().memory_limit_bytes, 100 * 1024 * 1024);
        assert_eq!(program.max_iterations(), 3);
    }

    #[test]
    fn empty_or_blank_code_is_rejected() {
        let cfg = LimitsConfig::default();
        for code in ["", "   \n\t"] {
            assert_eq!(
                SubmittedProgram::from_submission(&Submission::new(code), &cfg),
                Err(SubmissionError::EmptyCode)
            );
        }
    }

    #[test]
    fn oversized_code_is_rejected() {
        let cfg = LimitsConfig {
            max_code_length: 8,
            ..LimitsConfig::default()
        };
        assert_eq!(
            SubmittedProgram::from_submission(&Submission::new("print(12345)"), &cfg),
            Err(SubmissionError::CodeTooLong { len: 12, max: 8 })
        );
    }

    #[test]
    fn values_above_maxima_are_clamped() {
        let submission = Submission {
            timeout_secs: Some(600),
            memory_limit_mb: Some(4096),
            max_iterations: Some(50),
            ..Submission::new("print(1)")
        };
        let program = SubmittedProgram::from_submission(&submission, &LimitsConfig::default())
            .expect("admit");
        assert_eq!(program.limits().timeout, Duration::from_secs(10));
        assert_eq!(program.limits().memory_limit_bytes, 256 * 1024 * 1024);
        assert_eq!(program.max_iterations(), 10);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cfg = LimitsConfig::default();
        let zero_timeout = Submission {
            timeout_secs: Some(0),
            ..Submission::new("print(1)")
        };
        assert_eq!(
            SubmittedProgram::from_submission(&zero_timeout, &cfg),
            Err(SubmissionError::NotPositive { field: "timeout_secs" })
        );
        let zero_iterations = Submission {
            max_iterations: Some(0),
            ..Submission::new("print(1)")
        };
        assert_eq!(
            SubmittedProgram::from_submission(&zero_iterations, &cfg),
            Err(SubmissionError::NotPositive { field: "max_iterations" })
        );
    }

    #[test]
    fn submission_json_accepts_missing_limits() {
        let submission: Submission =
            serde_json::from_str(r#"{"code": "print(1)", "timeout_secs": 2}"#).expect("json");
        assert_eq!(submission.timeout_secs, Some(2));
        assert_eq!(submission.memory_limit_mb, None);
    }
}
