//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mender::io::config::RepairConfig;
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::report::{aggregate, cases_with_results};
use crate::run::run_case;

fn cases_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("cases")
}

fn results_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("results")
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&cases_dir(repo_root))? {
        println!("{}\texpect={}", case.case.id, case.expect.status.as_str());
    }
    Ok(())
}

/// Run one case, or every case when `case_id` is `None`.
pub fn run_cases(
    repo_root: &Path,
    cfg: &RepairConfig,
    case_id: Option<&str>,
    runs: u32,
) -> Result<()> {
    let selected = match case_id {
        Some(case_id) => {
            let case_path = cases_dir(repo_root).join(format!("{case_id}.toml"));
            if !case_path.exists() {
                bail!("case {} not found at {}", case_id, case_path.display());
            }
            let case = CaseFile::load(&case_path).context("load case")?;
            vec![(case_path, case)]
        }
        None => discover_cases(&cases_dir(repo_root))?
            .into_iter()
            .map(|case| {
                let path = cases_dir(repo_root).join(format!("{}.toml", case.case.id));
                (path, case)
            })
            .collect(),
    };
    if selected.is_empty() {
        bail!("no cases found in {}", cases_dir(repo_root).display());
    }

    info!(cases = selected.len(), runs, "starting runs");
    for (case_path, case) in &selected {
        for run_num in 1..=runs {
            debug!(case_id = %case.case.id, run_num, runs, "starting run");
            let outcome =
                run_case(&results_dir(repo_root), case_path, case, cfg).context("run case")?;
            println!(
                "run: case={} eval_run_id={} outcome={:?} record={}",
                case.case.id,
                outcome.eval_run_id,
                outcome.outcome,
                outcome.record_path.display()
            );
        }
    }
    Ok(())
}

/// Show aggregated results for one case, or every case with results.
pub fn report(repo_root: &Path, case_id: Option<&str>) -> Result<()> {
    let case_ids = match case_id {
        Some(case_id) => vec![case_id.to_string()],
        None => cases_with_results(&results_dir(repo_root))?,
    };
    for case_id in case_ids {
        report_case(repo_root, &case_id)?;
    }
    Ok(())
}

fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let (summary, warnings) = aggregate(&results_dir(repo_root).join(case_id))?;
    println!(
        "report: case={} runs={} pass_rate={:.2}",
        case_id,
        summary.runs,
        summary.pass_rate()
    );
    println!(
        "report: success={} fail={} error={}",
        summary.success, summary.fail, summary.error
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    if let Some(avg) = summary.avg_iterations {
        println!("report: avg_iterations={:.2}", avg);
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove recorded results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    if case_id.contains('/') || case_id.contains("..") {
        bail!("invalid case id {case_id}");
    }
    let case_results = results_dir(repo_root).join(case_id);
    if case_results.exists() {
        fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}
