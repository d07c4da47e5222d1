//! Remote device controller CLI.
//!
//! Offline tooling around controller inputs: validate a config/task pair and
//! replay captured device logs through a task's reward rules.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use controller::exit_codes;
use controller::logging;
use controller::replay::replay_log;
use controller::validate::{parse_settings, validate_inputs};

#[derive(Parser)]
#[command(
    name = "controller",
    version,
    about = "Remote device controller for learning environments"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a config and task, then print what they resolve to.
    Validate {
        /// Controller config TOML. Defaults apply when the file is missing.
        #[arg(long)]
        config: PathBuf,
        /// Task definition TOML.
        #[arg(long)]
        task: PathBuf,
        /// Dotted config override, e.g. `--set adb.serial=emulator-5554`.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Run a captured device log through the task's log rules.
    ReplayLog {
        /// Task definition TOML.
        #[arg(long)]
        task: PathBuf,
        /// Log file, one line per entry.
        log_file: PathBuf,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { config, task, set } => {
            let settings = parse_settings(&set)?;
            print_json(&validate_inputs(&config, &task, &settings)?)
        }
        Command::ReplayLog { task, log_file } => print_json(&replay_log(&task, &log_file)?),
    }
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
