//! Repair configuration stored in `mender.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::CapabilityPolicy;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mender.toml";

/// Repair configuration (TOML).
///
/// Built once at startup and passed explicitly to the validator, executor and
/// orchestrator. Missing fields fall back to the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    pub limits: LimitsConfig,
    pub sandbox: SandboxConfig,
    pub policy: CapabilityPolicy,
    pub patch: PatchConfig,
    pub advisor: AdvisorConfig,
}

/// Ceilings and request defaults for submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted program, in bytes.
    pub max_code_length: usize,
    pub max_timeout_secs: u64,
    pub max_memory_mb: u64,
    pub max_iterations: u32,
    pub default_timeout_secs: u64,
    pub default_memory_mb: u64,
    pub default_max_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_length: 10_000,
            max_timeout_secs: 10,
            max_memory_mb: 256,
            max_iterations: 10,
            default_timeout_secs: 5,
            default_memory_mb: 100,
            default_max_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter used to run submissions (looked up on `PATH`).
    pub interpreter: String,

    /// Truncate captured stdout/stderr beyond this many bytes each.
    pub output_limit_bytes: usize,

    /// Parent of the per-run sandbox directories; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            output_limit_bytes: 1_000_000,
            temp_dir: None,
        }
    }
}

/// How the repair loop obtains patch candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Local rewrite strategies only.
    #[default]
    Heuristic,
    /// External reasoning collaborator only.
    Advisor,
    /// Local strategies, falling back to the collaborator when they find nothing.
    HeuristicThenAdvisor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PatchConfig {
    pub mode: PatchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Generate endpoint of an Ollama-compatible server.
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Upper bound on the rendered prompt size, in bytes.
    pub prompt_budget_bytes: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "mistral".to_string(),
            timeout_secs: 30,
            prompt_budget_bytes: 16_000,
        }
    }
}

impl AdvisorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            sandbox: SandboxConfig::default(),
            policy: CapabilityPolicy::standard(),
            patch: PatchConfig::default(),
            advisor: AdvisorConfig::default(),
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_code_length == 0 {
            return Err(anyhow!("limits.max_code_length must be > 0"));
        }
        if limits.max_timeout_secs == 0 {
            return Err(anyhow!("limits.max_timeout_secs must be > 0"));
        }
        if limits.max_memory_mb == 0 {
            return Err(anyhow!("limits.max_memory_mb must be > 0"));
        }
        if limits.max_iterations == 0 {
            return Err(anyhow!("limits.max_iterations must be > 0"));
        }
        if limits.default_timeout_secs == 0 || limits.default_timeout_secs > limits.max_timeout_secs
        {
            return Err(anyhow!(
                "limits.default_timeout_secs must be in 1..={}",
                limits.max_timeout_secs
            ));
        }
        if limits.default_memory_mb == 0 || limits.default_memory_mb > limits.max_memory_mb {
            return Err(anyhow!(
                "limits.default_memory_mb must be in 1..={}",
                limits.max_memory_mb
            ));
        }
        if limits.default_max_iterations == 0
            || limits.default_max_iterations > limits.max_iterations
        {
            return Err(anyhow!(
                "limits.default_max_iterations must be in 1..={}",
                limits.max_iterations
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must be non-empty"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.advisor.timeout_secs == 0 {
            return Err(anyhow!("advisor.timeout_secs must be > 0"));
        }
        if self.patch.mode != PatchMode::Heuristic && self.advisor.endpoint.trim().is_empty() {
            return Err(anyhow!("advisor.endpoint must be set when patch.mode uses the advisor"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RepairConfig::default()`.
pub fn load_config(path: &Path) -> Result<RepairConfig> {
    if !path.exists() {
        let cfg = RepairConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RepairConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RepairConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
