//! In-process cron runner for `batch:daemon`.
//!
//! Requires the `scheduler` feature. Every job gets a cron expression, taken
//! from the `[schedule]` table of the configuration (keyed by watermark name,
//! e.g. `faucet-claim-stats` or `miner-shares-xmr`) or from its default.
//! An empty expression or `off` disables the job. All jobs share one lock, so
//! two jobs never run at the same time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use faucet_batch::jobs::{scheduler::BatchScheduler, JobContext};
//!
//! let scheduler = BatchScheduler::new(ctx).await?;
//! scheduler.start().await?;
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::info;

use super::{BatchJob, JobContext, JobError};

/// Cron expression used when the configuration names none.
pub fn default_cron(job: BatchJob) -> &'static str {
    match job {
        // Flag-based statistics pick up new rows every 15 minutes
        BatchJob::OfferwallStats | BatchJob::DailyTaskStats | BatchJob::ShortlinkStats => {
            "0 */15 * * * *"
        }
        // Date-window statistics, shortly after midnight
        BatchJob::FaucetClaimStats
        | BatchJob::RpsGameStats
        | BatchJob::MinerStats
        | BatchJob::WithdrawStats
        | BatchJob::WithdrawCurrencyStats
        | BatchJob::UserAccountStats
        | BatchJob::UserDailyStats
        | BatchJob::TransactionStats => "0 5 0 * * *",
        BatchJob::CacheGuildMembers => "0 10 0 * * *",
        BatchJob::GuildWeeklyCheck | BatchJob::CheckPtcPayments => "0 */30 * * * *",
        BatchJob::UserOnlineCheck => "0 */5 * * * *",
        BatchJob::UnlockGames => "0 * * * * *",
        BatchJob::FakeAccountCheck | BatchJob::MinerShares(_) => "0 0 * * * *",
        BatchJob::MinerPayments => "0 30 * * * *",
    }
}

/// Background scheduler running every batch job on its cron expression.
pub struct BatchScheduler {
    scheduler: TokioJobScheduler,
    ctx: JobContext,
    lock: Arc<Mutex<()>>,
}

impl BatchScheduler {
    /// Create a new scheduler.
    pub async fn new(ctx: JobContext) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            ctx,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Cron expression of `job`, `None` when disabled.
    pub fn cron_for(&self, job: BatchJob) -> Option<String> {
        let cron = self
            .ctx
            .config
            .schedule
            .get(&job.watermark_name())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| default_cron(job).to_string());
        (!cron.is_empty() && cron != "off").then_some(cron)
    }

    /// Register every enabled job and start the scheduler.
    /// Returns the number of scheduled jobs.
    pub async fn start(&self) -> Result<usize, JobError> {
        info!("Starting batch scheduler");

        let mut scheduled = 0;
        for job in BatchJob::all() {
            let Some(cron) = self.cron_for(job) else {
                info!(job = %job.watermark_name(), "Job disabled");
                continue;
            };
            self.add_job(job, &cron).await?;
            scheduled += 1;
        }

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        info!(jobs = scheduled, "Batch scheduler started successfully");
        Ok(scheduled)
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down batch scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;
        Ok(())
    }

    async fn add_job(&self, job: BatchJob, cron: &str) -> Result<(), JobError> {
        let ctx = self.ctx.clone();
        let lock = Arc::clone(&self.lock);

        let scheduled = Job::new_async(cron, move |_uuid, _l| {
            let ctx = ctx.clone();
            let lock = Arc::clone(&lock);
            Box::pin(async move {
                let _guard = lock.lock().await;
                let now = Utc::now().naive_utc();
                // Failures are reported through the job event log.
                let _ = job.run_logged(&ctx, now).await;
            })
        })
        .map_err(|e| JobError::Scheduler(format!("{}: {e}", job.watermark_name())))?;

        self.scheduler
            .add(scheduled)
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        info!(job = %job.watermark_name(), schedule = cron, "Added job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coin;

    #[test]
    fn every_job_has_a_default_schedule() {
        for job in BatchJob::all() {
            assert_eq!(default_cron(job).split_whitespace().count(), 6);
        }
        assert_eq!(default_cron(BatchJob::MinerShares(Coin::Xmr)), "0 0 * * * *");
    }
}
