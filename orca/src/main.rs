//! Hierarchical coding-agent orchestrator.
//!
//! `orca init` writes `.orca/config.toml`; `orca run` hands an instruction to
//! the orchestrator agent in the current directory and prints the outcome as
//! JSON.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use orca::exit_codes;
use orca::start::{RunOptions, init_project, load_run_config, start_run};

#[derive(Parser)]
#[command(
    name = "orca",
    version,
    about = "Hierarchical coding-agent orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orca/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the orchestrator on an instruction in the current directory.
    Run {
        /// Orchestrator turn limit (overrides `orchestrator.max_turns`).
        #[arg(long)]
        max_turns: Option<u32>,
        /// Wall-clock budget in seconds (overrides `orchestrator.time_budget_secs`).
        #[arg(long)]
        time_budget_secs: Option<u64>,
        /// Inline stored context content in subagent results.
        #[arg(long)]
        verbose_results: bool,
        /// Task for the orchestrator.
        #[arg(required = true, num_args = 1..)]
        instruction: Vec<String>,
    },
}

fn main() {
    orca::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = Path::new(".");
    match cli.command {
        Command::Init { force } => {
            let outcome = init_project(root, force)?;
            if outcome.written {
                println!("wrote {}", outcome.config_path.display());
            } else {
                println!(
                    "{} already exists (use --force to overwrite)",
                    outcome.config_path.display()
                );
            }
            Ok(exit_codes::OK)
        }
        Command::Run {
            max_turns,
            time_budget_secs,
            verbose_results,
            instruction,
        } => {
            let config = load_run_config(root)?;
            let options = RunOptions {
                max_turns,
                time_budget_secs,
                verbose_results,
            };
            let outcome = start_run(root, config, &instruction.join(" "), &options)?;
            let json = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
            println!("{json}");
            Ok(if outcome.completed {
                exit_codes::OK
            } else {
                exit_codes::INCOMPLETE
            })
        }
    }
}
