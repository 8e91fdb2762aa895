mod case;
mod cli;
mod judge;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mender::io::config::{DEFAULT_CONFIG_FILE, load_config};

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for the mender repair loop")]
struct Cli {
    /// Repair configuration applied to every case.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Run {
        case_id: Option<String>,
        /// Run every case in `eval/cases`.
        #[arg(long, conflicts_with = "case_id")]
        all: bool,
        #[arg(long, default_value_t = 1)]
        runs: u32,
    },
    Report {
        case_id: Option<String>,
    },
    Clean {
        case_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("eval=info".parse()?),
        )
        .init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir().context("resolve working directory")?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run { case_id, all, runs } => {
            if case_id.is_none() && !all {
                bail!("pass a case id or --all");
            }
            let cfg = load_config(&repo_root.join(&cli.config))?;
            cli::run_cases(&repo_root, &cfg, case_id.as_deref(), runs)
        }
        Command::Report { case_id } => cli::report(&repo_root, case_id.as_deref()),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}
