//! Sandboxed run / diagnose / repair CLI.
//!
//! Every command except `apply` prints JSON on stdout; `apply` prints the
//! patched program. Diagnostics go to stderr. Exit codes are listed in
//! [`mender::exit_codes`].

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mender::core::classifier::{classify, extract_error_context};
use mender::core::diff::apply_unified_diff;
use mender::core::patch::Patcher;
use mender::core::types::SessionStatus;
use mender::core::validator::validate;
use mender::exit_codes;
use mender::io::advisor::patcher_for_config;
use mender::io::config::{DEFAULT_CONFIG_FILE, RepairConfig, load_config, write_config};
use mender::io::executor::{CodeExecutor, SandboxExecutor};
use mender::io::session_log::write_session_log;
use mender::logging;
use mender::looping::run_repair;
use mender::submission::{Submission, SubmittedProgram, check_code};

#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Run, diagnose and repair untrusted Python programs in a sandbox"
)]
struct Cli {
    /// Path to the TOML config; a missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a program against the capability policy.
    Check { file: PathBuf },
    /// Validate, then execute a program once.
    Run {
        file: PathBuf,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        memory_mb: Option<u64>,
        /// Print a human-readable summary instead of JSON.
        #[arg(long)]
        text: bool,
    },
    /// Classify interpreter stderr read from a file or stdin.
    Classify { file: Option<PathBuf> },
    /// Propose a patch for a program given the stderr of a failed run.
    Patch {
        file: PathBuf,
        #[arg(long)]
        stderr: PathBuf,
    },
    /// Apply a unified diff (e.g. a candidate's `unified_diff`) to a program.
    Apply {
        file: PathBuf,
        #[arg(long)]
        diff: PathBuf,
    },
    /// Run the repair loop until the program succeeds or the budget runs out.
    Repair {
        file: PathBuf,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        memory_mb: Option<u64>,
        /// Write the session audit artifacts under this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config path.
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Check { file } => cmd_check(&cfg, &file),
        Command::Run {
            file,
            timeout,
            memory_mb,
            text,
        } => cmd_run(&cfg, &file, timeout, memory_mb, text),
        Command::Classify { file } => cmd_classify(file.as_deref()),
        Command::Patch { file, stderr } => cmd_patch(&cfg, &file, &stderr),
        Command::Apply { file, diff } => cmd_apply(&cfg, &file, &diff),
        Command::Repair {
            file,
            max_iterations,
            timeout,
            memory_mb,
            log_dir,
        } => {
            let submission = Submission {
                code: read_source(&file)?,
                timeout_secs: timeout,
                memory_limit_mb: memory_mb,
                max_iterations,
            };
            cmd_repair(&cfg, &submission, log_dir.as_deref())
        }
        Command::Config { write } => cmd_config(&cfg, &cli.config, write),
    }
}

fn cmd_check(cfg: &RepairConfig, file: &Path) -> Result<i32> {
    let decision = validate(&read_source(file)?, &cfg.policy);
    print_json(&decision)?;
    Ok(if decision.allowed {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    })
}

fn cmd_run(
    cfg: &RepairConfig,
    file: &Path,
    timeout: Option<u64>,
    memory_mb: Option<u64>,
    text: bool,
) -> Result<i32> {
    let submission = Submission {
        code: read_source(file)?,
        timeout_secs: timeout,
        memory_limit_mb: memory_mb,
        max_iterations: None,
    };
    let program = SubmittedProgram::from_submission(&submission, &cfg.limits)?;
    let decision = validate(program.code(), &cfg.policy);
    if !decision.allowed {
        print_json(&decision)?;
        return Ok(exit_codes::REJECTED);
    }

    let executor = SandboxExecutor::from_config(cfg);
    let outcome = executor.execute(program.code(), program.limits());
    if text {
        print!("{}", outcome.summary());
    } else {
        print_json(&outcome)?;
    }
    Ok(if outcome.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_classify(file: Option<&Path>) -> Result<i32> {
    let stderr = match file {
        Some(path) => read_source(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stderr from stdin")?;
            buf
        }
    };
    print_json(&classify(Some(&stderr)))?;
    Ok(exit_codes::OK)
}

fn cmd_patch(cfg: &RepairConfig, file: &Path, stderr_file: &Path) -> Result<i32> {
    let code = read_source(file)?;
    check_code(&code, &cfg.limits)?;
    let stderr = read_source(stderr_file)?;
    let error = classify(Some(&stderr));
    let candidate =
        patcher_for_config(cfg).propose(&code, &error, &extract_error_context(Some(&stderr)));
    print_json(&candidate)?;
    Ok(exit_codes::OK)
}

fn cmd_apply(cfg: &RepairConfig, file: &Path, diff_file: &Path) -> Result<i32> {
    let code = read_source(file)?;
    check_code(&code, &cfg.limits)?;
    let diff = read_source(diff_file)?;
    let patched = apply_unified_diff(&code, &diff)
        .with_context(|| format!("apply {}", diff_file.display()))?;
    print!("{patched}");
    Ok(exit_codes::OK)
}

fn cmd_repair(cfg: &RepairConfig, submission: &Submission, log_dir: Option<&Path>) -> Result<i32> {
    let program = SubmittedProgram::from_submission(submission, &cfg.limits)?;
    let executor = SandboxExecutor::from_config(cfg);
    let patcher = patcher_for_config(cfg);
    let session = run_repair(&program, &cfg.policy, &executor, &patcher, |iteration| {
        tracing::info!(
            index = iteration.index,
            status = ?iteration.outcome.status,
            "iteration recorded"
        );
    });

    if let Some(dir) = log_dir {
        let paths = write_session_log(dir, &session)?;
        eprintln!("session log: {}", paths.dir.display());
    }
    print_json(&session)?;
    Ok(match session.status {
        SessionStatus::Fixed => exit_codes::OK,
        SessionStatus::Rejected => exit_codes::REJECTED,
        SessionStatus::Exhausted | SessionStatus::Running => exit_codes::FAILED,
    })
}

fn cmd_config(cfg: &RepairConfig, path: &Path, write: bool) -> Result<i32> {
    if write {
        write_config(path, cfg)?;
        eprintln!("wrote {}", path.display());
    }
    print!("{}", toml::to_string_pretty(cfg).context("serialize config toml")?);
    Ok(exit_codes::OK)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Print `value` as pretty JSON with a trailing newline.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check() {
        let cli = Cli::parse_from(["mender", "check", "prog.py"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(cli.command, Command::Check { file } if file == Path::new("prog.py")));
    }

    #[test]
    fn parse_run_with_limits_and_text() {
        let cli = Cli::parse_from([
            "mender",
            "run",
            "prog.py",
            "--timeout",
            "2",
            "--memory-mb",
            "64",
            "--text",
        ]);
        assert!(matches!(
            cli.command,
            Command::Run {
                timeout: Some(2),
                memory_mb: Some(64),
                text: true,
                ..
            }
        ));
    }

    #[test]
    fn parse_repair_with_global_config() {
        let cli = Cli::parse_from([
            "mender",
            "repair",
            "prog.py",
            "--max-iterations",
            "4",
            "--log-dir",
            "logs",
            "--config",
            "custom.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Command::Repair {
                max_iterations,
                log_dir,
                timeout,
                ..
            } => {
                assert_eq!(max_iterations, Some(4));
                assert_eq!(log_dir, Some(PathBuf::from("logs")));
                assert_eq!(timeout, None);
            }
            _ => panic!("expected repair"),
        }
    }

    #[test]
    fn parse_classify_without_file_reads_stdin() {
        let cli = Cli::parse_from(["mender", "classify"]);
        assert!(matches!(cli.command, Command::Classify { file: None }));
    }

    #[test]
    fn parse_patch_requires_stderr() {
        assert!(Cli::try_parse_from(["mender", "patch", "prog.py"]).is_err());
        let cli = Cli::parse_from(["mender", "patch", "prog.py", "--stderr", "err.txt"]);
        assert!(matches!(cli.command, Command::Patch { .. }));
    }

    #[test]
    fn parse_config_write() {
        let cli = Cli::parse_from(["mender", "config", "--write"]);
        assert!(matches!(cli.command, Command::Config { write: true }));
    }
}
