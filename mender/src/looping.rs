//! The repair loop: run, classify, patch, adopt, repeat.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{classify, extract_error_context};
use crate::core::patch::Patcher;
use crate::core::policy::CapabilityPolicy;
use crate::core::types::{ExecutionStatus, RepairIteration, RepairSession, SessionStatus};
use crate::core::validator::validate;
use crate::io::executor::CodeExecutor;
use crate::submission::SubmittedProgram;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Drive `program` to a terminal session.
///
/// Validates once, then alternates execution and patching until the program
/// succeeds, the patcher finds nothing, or the iteration budget runs out.
/// `on_iteration` sees each iteration as soon as it is recorded. A panic in
/// any collaborator ends the session as `Exhausted` with `failure` set.
#[instrument(skip_all, fields(max_iterations = program.max_iterations()))]
pub fn run_repair<E, P, F>(
    program: &SubmittedProgram,
    policy: &CapabilityPolicy,
    executor: &E,
    patcher: &P,
    mut on_iteration: F,
) -> RepairSession
where
    E: CodeExecutor + ?Sized,
    P: Patcher + ?Sized,
    F: FnMut(&RepairIteration),
{
    let mut session = new_session(program);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        drive(&mut session, program, policy, executor, patcher, &mut on_iteration);
    }));
    if let Err(payload) = result {
        let message = panic_message(payload.as_ref());
        warn!(session_id = %session.session_id, %message, "repair step panicked");
        session.status = SessionStatus::Exhausted;
        session.failure = Some(format!("internal failure: {message}"));
    }
    if !session.status.is_terminal() {
        session.status = SessionStatus::Exhausted;
    }
    session.total_iterations = u32::try_from(session.iterations.len()).unwrap_or(u32::MAX);

    info!(
        session_id = %session.session_id,
        status = session.status.as_str(),
        iterations = session.total_iterations,
        "repair session finished"
    );
    session
}

fn drive<E, P, F>(
    session: &mut RepairSession,
    program: &SubmittedProgram,
    policy: &CapabilityPolicy,
    executor: &E,
    patcher: &P,
    on_iteration: &mut F,
) where
    E: CodeExecutor + ?Sized,
    P: Patcher + ?Sized,
    F: FnMut(&RepairIteration),
{
    let decision = validate(&session.current_code, policy);
    let allowed = decision.allowed;
    session.policy = Some(decision);
    if !allowed {
        debug!(session_id = %session.session_id, "rejected by policy");
        session.status = SessionStatus::Rejected;
        return;
    }

    for index in 1..=program.max_iterations() {
        let code = session.current_code.clone();
        let outcome = executor.execute(&code, program.limits());
        debug!(index, status = ?outcome.status, exit_code = outcome.exit_code, "executed");

        match outcome.status {
            ExecutionStatus::Success => {
                record(session, on_iteration, RepairIteration {
                    index,
                    code_at_start: code,
                    outcome,
                    error: None,
                    candidate: None,
                });
                session.repaired = true;
                session.status = SessionStatus::Fixed;
                return;
            }
            ExecutionStatus::InternalError => {
                let failure = outcome.stderr.clone();
                record(session, on_iteration, RepairIteration {
                    index,
                    code_at_start: code,
                    outcome,
                    error: None,
                    candidate: None,
                });
                session.failure = Some(failure);
                session.status = SessionStatus::Exhausted;
                return;
            }
            ExecutionStatus::RuntimeError | ExecutionStatus::Timeout => {}
        }

        let error = classify(Some(&outcome.stderr));
        let diagnostics = extract_error_context(Some(&outcome.stderr));
        let candidate = patcher.propose(&code, &error, &diagnostics);
        let next_code = (!candidate.is_no_fix()).then(|| candidate.rewritten_code.clone());
        debug!(
            index,
            kind = %error.kind,
            line = ?error.line_number,
            confidence = candidate.confidence,
            "proposed patch"
        );
        record(session, on_iteration, RepairIteration {
            index,
            code_at_start: code,
            outcome,
            error: Some(error),
            candidate: Some(candidate),
        });

        let Some(next_code) = next_code else {
            session.status = SessionStatus::Exhausted;
            return;
        };
        session.current_code = next_code;
    }
    session.status = SessionStatus::Exhausted;
}

/// Terminal session for a repair that could not be driven at all, e.g. when
/// the worker running [`run_repair`] was lost.
pub fn abandoned_session(program: &SubmittedProgram, failure: impl Into<String>) -> RepairSession {
    RepairSession {
        status: SessionStatus::Exhausted,
        failure: Some(failure.into()),
        ..new_session(program)
    }
}

fn new_session(program: &SubmittedProgram) -> RepairSession {
    RepairSession {
        session_id: new_session_id(),
        original_code: program.code().to_string(),
        current_code: program.code().to_string(),
        policy: None,
        iterations: Vec::new(),
        repaired: false,
        status: SessionStatus::Running,
        failure: None,
        total_iterations: 0,
    }
}

fn record<F: FnMut(&RepairIteration)>(
    session: &mut RepairSession,
    on_iteration: &mut F,
    iteration: RepairIteration,
) {
    on_iteration(&iteration);
    session.iterations.push(iteration);
}

/// Hex session id: wall-clock nanoseconds plus a process-wide counter.
fn new_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}{seq:04x}")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::HeuristicPatcher;
    use crate::core::types::{ErrorDescriptor, ExecutionOutcome, PatchCandidate, PatchSource};
    use crate::io::config::LimitsConfig;
    use crate::submission::Submission;
    use crate::test_support::{PanickingExecutor, ScriptedExecutor, runtime_error, success, timeout};

    fn program(code: &str, max_iterations: u32) -> SubmittedProgram {
        let submission = Submission {
            max_iterations: Some(max_iterations),
            ..Submission::new(code)
        };
        SubmittedProgram::from_submission(&submission, &LimitsConfig::default()).expect("admit")
    }

    fn repair(program: &SubmittedProgram, executor: &ScriptedExecutor) -> RepairSession {
        run_repair(
            program,
            &CapabilityPolicy::standard(),
            executor,
            &HeuristicPatcher,
            |_| {},
        )
    }

    #[test]
    fn name_error_is_fixed_on_second_iteration() {
        let executor = ScriptedExecutor::new(vec![
            runtime_error(1, "NameError: name 'x' is not defined"),
            success("0\n"),
        ]);
        let session = repair(&program("print(x)\n", 3), &executor);

        assert_eq!(session.status, SessionStatus::Fixed);
        assert!(session.repaired);
        assert_eq!(session.total_iterations, 2);
        assert_eq!(session.current_code, "x = 0\nprint(x)\n");
        assert_eq!(executor.seen(), vec!["print(x)\n", "x = 0\nprint(x)\n"]);

        let first = &session.iterations[0];
        assert_eq!(first.index, 1);
        assert_eq!(first.error.as_ref().map(|e| e.kind.as_str()), Some("NameError"));
        assert_eq!(first.candidate.as_ref().map(|c| c.confidence), Some(0.8));
        assert!(session.iterations[1].candidate.is_none());
    }

    #[test]
    fn division_by_zero_literal_is_fixed() {
        let executor = ScriptedExecutor::new(vec![
            runtime_error(1, "ZeroDivisionError: division by zero"),
            success("10.0\n"),
        ]);
        let session = repair(&program("print(10 / 0)\n", 3), &executor);
        assert_eq!(session.status, SessionStatus::Fixed);
        assert_eq!(session.current_code, "print(10 / 1)\n");
    }

    #[test]
    fn rejected_program_is_never_executed() {
        let executor = ScriptedExecutor::new(vec![success("")]);
        let session = repair(&program("syntax error !@#\n", 2), &executor);

        assert_eq!(session.status, SessionStatus::Rejected);
        assert_eq!(session.total_iterations, 0);
        assert!(executor.seen().is_empty());
        let policy = session.policy.expect("policy decision");
        assert!(!policy.allowed);
        assert!(policy.violations[0].starts_with("SyntaxError"));
    }

    #[test]
    fn forbidden_import_is_rejected_with_violation() {
        let executor = ScriptedExecutor::new(Vec::new());
        let session = repair(&program("import os\nos.listdir('.')\n", 3), &executor);
        assert_eq!(session.status, SessionStatus::Rejected);
        assert_eq!(
            session.policy.expect("policy").violations,
            vec!["Importing 'os' is forbidden."]
        );
    }

    #[test]
    fn syntax_error_at_runtime_exhausts_after_one_iteration() {
        let executor = ScriptedExecutor::new(vec![runtime_error(
            1,
            "SyntaxError: invalid syntax",
        )]);
        let session = repair(&program("print(1)\n", 2), &executor);
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.total_iterations, 1);
        assert!(!session.repaired);
        assert!(session.failure.is_none());
        assert_eq!(session.current_code, "print(1)\n");
    }

    #[test]
    fn timeout_without_strategy_exhausts() {
        let executor = ScriptedExecutor::new(vec![timeout()]);
        let session = repair(&program("while True:\n    pass\n", 3), &executor);
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.total_iterations, 1);
        let candidate = session.iterations[0].candidate.as_ref().expect("candidate");
        assert_eq!(candidate.confidence, 0.0);
    }

    #[test]
    fn budget_is_never_exceeded() {
        // Every run fails with a fresh undefined name, so each patch "works"
        // but the program never succeeds.
        let executor = ScriptedExecutor::new(vec![
            runtime_error(1, "NameError: name 'a' is not defined"),
            runtime_error(2, "NameError: name 'b' is not defined"),
            runtime_error(3, "NameError: name 'c' is not defined"),
        ]);
        let session = repair(&program("print(a, b, c)\n", 2), &executor);
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.total_iterations, 2);
        assert_eq!(executor.seen().len(), 2);
        assert!(session.failure.is_none());
    }

    #[test]
    fn internal_error_ends_session_with_failure() {
        let executor = ScriptedExecutor::new(vec![ExecutionOutcome::internal_error(
            "spawn interpreter: No such file or directory",
            0,
        )]);
        let session = repair(&program("print(1)\n", 3), &executor);
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.total_iterations, 1);
        assert_eq!(
            session.failure.as_deref(),
            Some("spawn interpreter: No such file or directory")
        );
    }

    #[test]
    fn panicking_executor_yields_complete_exhausted_session() {
        let session = run_repair(
            &program("print(1)\n", 3),
            &CapabilityPolicy::standard(),
            &PanickingExecutor,
            &HeuristicPatcher,
            |_| {},
        );
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.total_iterations, 0);
        assert!(
            session
                .failure
                .as_deref()
                .is_some_and(|f| f.contains("executor blew up"))
        );
        assert!(session.policy.is_some_and(|p| p.allowed));
    }

    struct ConstantPatcher(String);

    impl Patcher for ConstantPatcher {
        fn propose(&self, code: &str, _error: &ErrorDescriptor, _diagnostics: &str) -> PatchCandidate {
            crate::core::patch::finish_candidate(
                code,
                self.0.clone(),
                "constant".to_string(),
                0.5,
                PatchSource::Advisor,
            )
        }
    }

    #[test]
    fn advisor_style_patcher_follows_same_control_flow() {
        let executor = ScriptedExecutor::new(vec![
            runtime_error(2, "KeyError: 'k'"),
            success("1\n"),
        ]);
        let patcher = ConstantPatcher("d = {'k': 1}\nprint(d['k'])\n".to_string());
        let session = run_repair(
            &program("d = {}\nprint(d['k'])\n", 3),
            &CapabilityPolicy::standard(),
            &executor,
            &patcher,
            |_| {},
        );
        assert_eq!(session.status, SessionStatus::Fixed);
        assert_eq!(
            session.iterations[0].candidate.as_ref().map(|c| c.source),
            Some(PatchSource::Advisor)
        );
    }

    #[test]
    fn observer_sees_every_iteration_in_order() {
        let executor = ScriptedExecutor::new(vec![
            runtime_error(1, "NameError: name 'x' is not defined"),
            success("0\n"),
        ]);
        let mut seen = Vec::new();
        let session = run_repair(
            &program("print(x)\n", 3),
            &CapabilityPolicy::standard(),
            &executor,
            &HeuristicPatcher,
            |iteration| seen.push(iteration.index),
        );
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(session.total_iterations, 2);
    }

    #[test]
    fn abandoned_session_is_terminal_with_failure() {
        let session = abandoned_session(&program("print(1)\n", 3), "worker lost");
        assert_eq!(session.status, SessionStatus::Exhausted);
        assert_eq!(session.failure.as_deref(), Some("worker lost"));
        assert_eq!(session.current_code, "print(1)\n");
        assert_eq!(session.total_iterations, 0);
    }

    #[test]
    fn session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
