//! Case file parsing and validation.
//!
//! Cases are TOML files describing a broken program and what the repair loop
//! should make of it. See `eval/cases/` for examples.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use mender::core::types::SessionStatus;
use mender::io::config::PatchMode;
use serde::Deserialize;

/// A parsed case file: the program, optional overrides and expectations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    pub expect: Expectation,
}

/// Case metadata and the submitted program.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Program text submitted for repair.
    pub code: String,
    pub max_iterations: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// Repair configuration overrides for the case.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub patch_mode: Option<PatchMode>,
}

/// What a correct repair of the case looks like.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Expectation {
    pub status: SessionStatus,
    /// Substrings the final code must contain.
    #[serde(default)]
    pub final_code_contains: Vec<String>,
    /// Upper bound on iterations spent.
    pub max_iterations_used: Option<u32>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.code.trim().is_empty() {
            bail!("case.code must be non-empty");
        }
        if self.case.max_iterations == Some(0) {
            bail!("case.max_iterations must be > 0");
        }
        if self.case.timeout_secs == Some(0) {
            bail!("case.timeout_secs must be > 0");
        }
        if self.expect.status == SessionStatus::Running {
            bail!("expect.status must be a terminal status");
        }
        if self.expect.final_code_contains.iter().any(|s| s.is_empty()) {
            bail!("expect.final_code_contains entries must be non-empty");
        }
        if self.expect.max_iterations_used == Some(0) && self.expect.status != SessionStatus::Rejected
        {
            bail!("expect.max_iterations_used = 0 only fits a rejected case");
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
