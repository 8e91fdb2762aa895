use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::read_record;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    pub avg_iterations: Option<f64>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

impl ReportSummary {
    pub fn pass_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.success as f64 / self.runs as f64
    }
}

pub fn load_record_files(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Case ids that have a results directory, sorted.
pub fn cases_with_results(results_dir: &Path) -> Result<Vec<String>> {
    if !results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in
        fs::read_dir(results_dir).with_context(|| format!("read {}", results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut total_iterations = 0u64;

    for path in load_record_files(case_results_dir)? {
        let record = match read_record(&path) {
            Ok(record) => record,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", path.display()));
                continue;
            }
        };

        summary.runs += 1;
        match record.outcome {
            Outcome::Success => summary.success += 1,
            Outcome::Fail => summary.fail += 1,
            Outcome::Error => summary.error += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => record.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + record.duration_secs;
                total / summary.runs as f64
            }
        });
        total_iterations += u64::from(record.session.total_iterations);
        summary.avg_iterations = Some(total_iterations as f64 / summary.runs as f64);

        for check in &record.judgment.checks {
            let entry = summary.check_pass_rates.entry(check.label()).or_insert((0, 0));
            if check.passed() {
                entry.0 += 1;
            }
            entry.1 += 1;
        }
    }

    Ok((summary, warnings))
}
