use chrono::Utc;
use std::env;
use tracing::{error, info};

use faucet_batch::cli::{execute_watermark_command, parse_args, print_commands, BatchCommand};
use faucet_batch::logging::init_logging;
use faucet_batch::{BatchConfig, BatchError, Database, JobContext};

/// Every command exits with status 0; failures are reported in the log.
#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args);

    let config = match BatchConfig::load_from(cli.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&Default::default());
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(cli.command, config).await {
        error!("{}", e);
    }
}

async fn run(command: BatchCommand, config: BatchConfig) -> Result<(), BatchError> {
    match &command {
        BatchCommand::List => {
            print_commands();
            return Ok(());
        }
        BatchCommand::Invalid(reason) => {
            print_commands();
            return Err(BatchError::InvalidInput(reason.clone()));
        }
        _ => {}
    }

    let db = Database::connect(&config.database).await?;

    match command {
        BatchCommand::Migrate => {
            db.migrate().await?;
            info!(backend = db.backend(), "Schema applied");
        }
        cmd @ (BatchCommand::WatermarkShow(_)
        | BatchCommand::WatermarkSet { .. }
        | BatchCommand::WatermarkReset(_)) => {
            execute_watermark_command(&db, &cmd).await?;
        }
        BatchCommand::Run(job) => {
            let ctx = JobContext::new(db, config)?;
            // Errors are already reported by the job event log.
            let _ = job.run_logged(&ctx, Utc::now().naive_utc()).await;
        }
        BatchCommand::Daemon => run_daemon(db, config).await?,
        BatchCommand::List | BatchCommand::Invalid(_) => {}
    }
    Ok(())
}

#[cfg(feature = "scheduler")]
async fn run_daemon(db: Database, config: BatchConfig) -> Result<(), BatchError> {
    use faucet_batch::jobs::scheduler::BatchScheduler;

    let ctx = JobContext::new(db, config)?;
    let mut scheduler = BatchScheduler::new(ctx)
        .await
        .map_err(|e| BatchError::ConfigError(e.to_string()))?;
    scheduler
        .start()
        .await
        .map_err(|e| BatchError::ConfigError(e.to_string()))?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    scheduler
        .shutdown()
        .await
        .map_err(|e| BatchError::ConfigError(e.to_string()))?;
    Ok(())
}

#[cfg(not(feature = "scheduler"))]
async fn run_daemon(_db: Database, _config: BatchConfig) -> Result<(), BatchError> {
    Err(BatchError::ConfigError(
        "batch:daemon requires the `scheduler` feature".to_string(),
    ))
}
