//! Case execution orchestration.
//!
//! Coordinates submission building, the repair loop, judging and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mender::core::patch::Patcher;
use mender::io::advisor::patcher_for_config;
use mender::io::config::RepairConfig;
use mender::io::executor::{CodeExecutor, SandboxExecutor};
use mender::looping::run_repair;
use mender::submission::{Submission, SubmittedProgram};
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::judge::judge;
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{EvalRecord, file_sha256, write_record};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    /// Path to the written record.
    pub record_path: PathBuf,
    pub outcome: Outcome,
}

/// Run a case end-to-end against the real sandbox.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(
    results_dir: &Path,
    case_path: &Path,
    case: &CaseFile,
    cfg: &RepairConfig,
) -> Result<RunOutcome> {
    let cfg = apply_case_config(cfg, case);
    let executor = SandboxExecutor::from_config(&cfg);
    let patcher = patcher_for_config(&cfg);
    run_case_with(results_dir, case_path, case, &cfg, &executor, &patcher)
}

/// Run a case with explicit collaborators.
pub fn run_case_with<E, P>(
    results_dir: &Path,
    case_path: &Path,
    case: &CaseFile,
    cfg: &RepairConfig,
    executor: &E,
    patcher: &P,
) -> Result<RunOutcome>
where
    E: CodeExecutor + ?Sized,
    P: Patcher + ?Sized,
{
    info!("case run started");
    let case_hash = file_sha256(case_path).context("hash case file")?;

    let submission = Submission {
        code: case.case.code.clone(),
        timeout_secs: case.case.timeout_secs,
        memory_limit_mb: None,
        max_iterations: case.case.max_iterations,
    };
    let program = SubmittedProgram::from_submission(&submission, &cfg.limits)
        .context("build submission")?;

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(started_at);
    let session = run_repair(&program, &cfg.policy, executor, patcher, |iteration| {
        debug!(index = iteration.index, status = ?iteration.outcome.status, "iteration");
    });
    let finished_at = Utc::now();
    let duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;

    let judgment = judge(&case.expect, &session);
    let outcome = classify_outcome(&session, &judgment);
    info!(
        status = session.status.as_str(),
        iterations = session.total_iterations,
        duration_secs,
        outcome = ?outcome,
        "repair finished"
    );

    let record = EvalRecord {
        case_id: case.case.id.clone(),
        eval_run_id: eval_run_id.clone(),
        case_hash,
        patch_mode: cfg.patch.mode,
        start_time: started_at.to_rfc3339(),
        end_time: finished_at.to_rfc3339(),
        duration_secs,
        outcome,
        judgment,
        session,
    };
    let record_path = write_record(results_dir, &record).context("write record")?;

    Ok(RunOutcome {
        eval_run_id,
        record_path,
        outcome,
    })
}

/// Apply per-case overrides on top of the repair configuration.
pub fn apply_case_config(cfg: &RepairConfig, case: &CaseFile) -> RepairConfig {
    let mut cfg = cfg.clone();
    if let Some(mode) = case.config.patch_mode {
        cfg.patch.mode = mode;
    }
    cfg
}

/// Millisecond resolution keeps back-to-back runs apart.
fn eval_run_id(at: DateTime<Utc>) -> String {
    format!("eval-{}", at.format("%Y%m%d_%H%M%S_%3f"))
}
