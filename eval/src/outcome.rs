use mender::core::types::RepairSession;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Error,
}

/// A session that ended on an internal failure is an error regardless of checks.
pub fn classify_outcome(session: &RepairSession, judgment: &Judgment) -> Outcome {
    if session.failure.is_some() {
        return Outcome::Error;
    }
    if judgment.all_passed() {
        Outcome::Success
    } else {
        Outcome::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use mender::core::types::SessionStatus;

    fn judgment(pass: bool) -> Judgment {
        Judgment {
            checks: vec![CheckOutcome::Status {
                expected: SessionStatus::Fixed,
                actual: SessionStatus::Fixed,
                passed: pass,
            }],
        }
    }

    fn session(failure: Option<&str>) -> RepairSession {
        RepairSession {
            session_id: "s".to_string(),
            original_code: "print(1)\n".to_string(),
            current_code: "print(1)\n".to_string(),
            policy: None,
            iterations: Vec::new(),
            repaired: false,
            status: SessionStatus::Exhausted,
            failure: failure.map(str::to_string),
            total_iterations: 0,
        }
    }

    #[test]
    fn success_when_checks_pass() {
        assert_eq!(classify_outcome(&session(None), &judgment(true)), Outcome::Success);
    }

    #[test]
    fn fail_when_checks_fail() {
        assert_eq!(classify_outcome(&session(None), &judgment(false)), Outcome::Fail);
    }

    #[test]
    fn error_when_session_failed_internally() {
        let failed = session(Some("spawn interpreter: not found"));
        assert_eq!(classify_outcome(&failed, &judgment(true)), Outcome::Error);
    }
}
