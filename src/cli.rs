//! Command line parsing and the operator commands.
//!
//! ```text
//! faucet-batch batch:faucet-claim-stats
//! faucet-batch batch:miner-shares --coin=xmr
//! faucet-batch batch:watermark set faucet-claim-stats 2024-03-05
//! faucet-batch --config /etc/faucet/batch.toml batch:daemon
//! ```

use chrono::NaiveDate;
use std::path::PathBuf;

use crate::errors::{BatchError, BatchResult};
use crate::jobs::{BatchJob, COMMANDS};
use crate::store::Database;
use crate::types::Coin;

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCommand {
    /// Run one job
    Run(BatchJob),
    /// Apply the bundled schema
    Migrate,
    /// Print one or every watermark
    WatermarkShow(Option<String>),
    /// Set the last processed date of a job
    WatermarkSet { job: String, date: NaiveDate },
    /// Clear the last run time of a job
    WatermarkReset(String),
    /// Run the cron scheduler
    Daemon,
    /// Print the command list
    List,
    /// Unusable arguments, with the reason
    Invalid(String),
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: BatchCommand,
    pub config_path: Option<PathBuf>,
}

/// Parse the process arguments (`args[0]` is the program name).
pub fn parse_args(args: &[String]) -> CliArgs {
    let mut positional: Vec<&str> = Vec::new();
    let mut config_path = None;
    let mut coin_arg: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        if let Some(value) = arg.strip_prefix("--coin=") {
            coin_arg = Some(value);
            i += 1;
        } else if let Some(value) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
            i += 1;
        } else {
            match arg {
                "--coin" | "-c" => {
                    if i + 1 < args.len() {
                        coin_arg = Some(args[i + 1].as_str());
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                "--config" => {
                    if i + 1 < args.len() {
                        config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                _ => {
                    positional.push(arg);
                    i += 1;
                }
            }
        }
    }

    let command = match parse_command(&positional, coin_arg) {
        Ok(command) => command,
        Err(e) => BatchCommand::Invalid(e.to_string()),
    };
    CliArgs {
        command,
        config_path,
    }
}

fn parse_command(positional: &[&str], coin_arg: Option<&str>) -> BatchResult<BatchCommand> {
    let Some(name) = positional.first() else {
        return Ok(BatchCommand::List);
    };

    match *name {
        "batch:list" | "list" | "help" | "--help" | "-h" => Ok(BatchCommand::List),
        "batch:migrate" => Ok(BatchCommand::Migrate),
        "batch:daemon" => Ok(BatchCommand::Daemon),
        "batch:watermark" => parse_watermark(&positional[1..]),
        command => {
            let coin = coin_arg.map(str::parse::<Coin>).transpose()?;
            match BatchJob::from_command(command, coin)? {
                Some(job) => Ok(BatchCommand::Run(job)),
                None => Err(BatchError::InvalidInput(format!(
                    "unknown command: {command}"
                ))),
            }
        }
    }
}

fn parse_watermark(args: &[&str]) -> BatchResult<BatchCommand> {
    match args {
        [] | ["show"] => Ok(BatchCommand::WatermarkShow(None)),
        ["show", job] => Ok(BatchCommand::WatermarkShow(Some(job.to_string()))),
        ["set", job, date] => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
                BatchError::InvalidInput(format!("invalid date {date}: {e}"))
            })?;
            Ok(BatchCommand::WatermarkSet {
                job: job.to_string(),
                date,
            })
        }
        ["reset", job] => Ok(BatchCommand::WatermarkReset(job.to_string())),
        _ => Err(BatchError::InvalidInput(
            "usage: batch:watermark show [<job>] | set <job> <YYYY-MM-DD> | reset <job>".to_string(),
        )),
    }
}

/// Print the command list.
pub fn print_commands() {
    println!("faucet-batch {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Jobs:");
    for (command, description) in COMMANDS {
        println!("  {command:<32} {description}");
    }
    println!();
    println!("Operator commands:");
    println!("  {:<32} {}", "batch:migrate", "Apply the bundled database schema");
    println!("  {:<32} {}", "batch:watermark show [<job>]", "Show job watermarks");
    println!("  {:<32} {}", "batch:watermark set <job> <date>", "Set the last processed date");
    println!("  {:<32} {}", "batch:watermark reset <job>", "Allow a job to run again today");
    println!("  {:<32} {}", "batch:daemon", "Run every job on its schedule");
    println!();
    println!("Options: --config <path>, --coin=<xmr|etc|rvn>");
}

/// Execute a watermark command against the database.
pub async fn execute_watermark_command(db: &Database, cmd: &BatchCommand) -> BatchResult<()> {
    match cmd {
        BatchCommand::WatermarkShow(job) => {
            let marks = match job {
                Some(job) => vec![db.load_watermark(job).await?],
                None => db.list_watermarks().await?,
            };
            if marks.is_empty() {
                println!("No watermarks recorded.");
            }
            for mark in marks {
                let processed = mark
                    .last_processed_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let last_run = mark
                    .last_run_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:<32} processed={processed:<12} last_run={last_run}", mark.job_name);
            }
        }
        BatchCommand::WatermarkSet { job, date } => {
            db.set_watermark_date(job, *date).await?;
            println!("Watermark of {job} set to {date}.");
        }
        BatchCommand::WatermarkReset(job) => {
            if db.reset_watermark_run(job).await? {
                println!("Last run of {job} cleared.");
            } else {
                println!("No watermark recorded for {job}.");
            }
        }
        other => {
            return Err(BatchError::InvalidInput(format!(
                "not a watermark command: {other:?}"
            )))
        }
    }
    Ok(())
}
