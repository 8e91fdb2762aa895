//! Result persistence.
//!
//! Each run of a case is one JSON record at
//! `eval/results/<case_id>/<eval_run_id>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mender::core::types::RepairSession;
use mender::io::config::PatchMode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::judge::Judgment;
use crate::outcome::Outcome;

/// Everything recorded about one eval run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 of the case file for reproducibility tracking.
    pub case_hash: String,
    pub patch_mode: PatchMode,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub outcome: Outcome,
    pub judgment: Judgment,
    pub session: RepairSession,
}

pub fn record_path(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(format!("{eval_run_id}.json"))
}

#[instrument(skip_all, fields(case_id = %record.case_id, eval_run_id = %record.eval_run_id))]
pub fn write_record(base_dir: &Path, record: &EvalRecord) -> Result<PathBuf> {
    let path = record_path(base_dir, &record.case_id, &record.eval_run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create results dir {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(record).context("serialize record")?;
    fs::write(&path, format!("{contents}\n"))
        .with_context(|| format!("write record {}", path.display()))?;
    debug!(path = %path.display(), "record written");
    Ok(path)
}

pub fn read_record(path: &Path) -> Result<EvalRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}
