//! Compares a finished repair session against a case's expectations.

use mender::core::types::{RepairSession, SessionStatus};
use serde::{Deserialize, Serialize};

use crate::case::Expectation;

/// Collected check outcomes for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

/// Result of a single expectation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    Status {
        expected: SessionStatus,
        actual: SessionStatus,
        passed: bool,
    },
    FinalCodeContains {
        needle: String,
        passed: bool,
    },
    IterationsWithin {
        max: u32,
        actual: u32,
        passed: bool,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::Status { passed, .. }
            | CheckOutcome::FinalCodeContains { passed, .. }
            | CheckOutcome::IterationsWithin { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::Status { expected, .. } => format!("status({})", expected.as_str()),
            CheckOutcome::FinalCodeContains { needle, .. } => {
                format!("final_code_contains({needle})")
            }
            CheckOutcome::IterationsWithin { max, .. } => format!("iterations_within({max})"),
        }
    }
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

pub fn judge(expect: &Expectation, session: &RepairSession) -> Judgment {
    let mut checks = vec![CheckOutcome::Status {
        expected: expect.status,
        actual: session.status,
        passed: expect.status == session.status,
    }];
    checks.extend(
        expect
            .final_code_contains
            .iter()
            .map(|needle| CheckOutcome::FinalCodeContains {
                needle: needle.clone(),
                passed: session.current_code.contains(needle.as_str()),
            }),
    );
    if let Some(max) = expect.max_iterations_used {
        checks.push(CheckOutcome::IterationsWithin {
            max,
            actual: session.total_iterations,
            passed: session.total_iterations <= max,
        });
    }
    Judgment { checks }
}
