//! Batch jobs.
//!
//! Every job is a standalone command (`batch:<name>`). Statistics jobs read
//! the rows added since their last run, reduce them to per-user, per-guild
//! and global sums and write those into the counter table. Maintenance jobs
//! expire, unlock, pay out or flag things.
//!
//! # Guards
//!
//! Date-window jobs process exactly one calendar day per run: the day after
//! the watermark's `last_processed_date`. They run at most once per calendar
//! day, and stamp `last_run_at` before any work. Flag-based jobs consume every
//! row whose `stats_processed` flag is unset and need no guard.
//!
//! # Usage
//!
//! ```rust,ignore
//! use faucet_batch::jobs::{BatchJob, JobContext};
//!
//! let ctx = JobContext::new(db, config)?;
//! let outcome = BatchJob::FaucetClaimStats.run_logged(&ctx, now).await?;
//! ```

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use std::sync::Arc;

use crate::config::BatchConfig;
use crate::errors::{BatchError, BatchResult};
use crate::invoice::{CryptoUnifierClient, InvoiceApi};
use crate::logging::{generate_run_id, log_job_event, JobEvent};
use crate::mining::{NanopoolClient, PoolApi};
use crate::store::{Database, RunPeriod};
use crate::types::Coin;

mod accounts;
mod activity_stats;
mod finance_stats;
pub mod fraud;
mod guilds;
mod maintenance;
mod mining;
mod payments;
#[cfg(feature = "scheduler")]
pub mod scheduler;

pub use accounts::{run_user_account_stats, run_user_daily_stats};
pub use activity_stats::{
    run_daily_task_stats, run_faucet_claim_stats, run_offerwall_stats, run_rps_game_stats,
    run_shortlink_stats, shortlink_difficulty, OfferTier,
};
pub use finance_stats::{
    run_miner_stats, run_transaction_stats, run_withdraw_currency_stats, run_withdraw_stats,
};
pub use fraud::run_fake_account_check;
pub use guilds::{run_cache_guild_members, run_guild_weekly_check};
pub use maintenance::{run_unlock_games, run_user_online_check};
pub use mining::{run_miner_payments, run_miner_shares};
pub use payments::run_check_ptc_payments;

/// Errors that end a job run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(String),

    /// Missing or unusable processing date.
    #[error("Date error: {0}")]
    Date(String),

    /// An external API answered without the data the job needs.
    #[error("Upstream data missing: {0}")]
    Upstream(String),

    #[error("Payment queue total {total} exceeds the limit {limit}")]
    BudgetExceeded { total: f64, limit: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<BatchError> for JobError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::DatabaseError(msg) => JobError::Database(msg),
            BatchError::NetworkError(msg) | BatchError::UpstreamMissing(msg) => {
                JobError::Upstream(msg)
            }
            BatchError::ConfigError(msg) | BatchError::InvalidInput(msg) => JobError::Config(msg),
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Database(err.to_string())
    }
}

/// Why a job did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The once-per-period guard refused the run.
    AlreadyRan,
    /// The next day to process has not ended yet.
    WindowOpen(NaiveDate),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRan => write!(f, "already ran in this period"),
            SkipReason::WindowOpen(date) => write!(f, "day {date} is not over yet"),
        }
    }
}

/// Result of a job run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Number of source rows (or subjects) processed.
    Completed { processed: usize },
    Skipped(SkipReason),
}

impl JobOutcome {
    pub fn completed(processed: usize) -> Self {
        JobOutcome::Completed { processed }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { processed } => write!(f, "processed {processed}"),
            JobOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// Everything a job needs: storage, configuration and the external APIs.
#[derive(Clone)]
pub struct JobContext {
    pub db: Arc<Database>,
    pub config: Arc<BatchConfig>,
    pub pool_api: Arc<dyn PoolApi>,
    pub invoice_api: Arc<dyn InvoiceApi>,
}

impl JobContext {
    /// Context with the HTTP clients built from `config`.
    pub fn new(db: Database, config: BatchConfig) -> BatchResult<Self> {
        let pool_api = NanopoolClient::new(&config.mining, &config.http)?;
        let invoice_api = CryptoUnifierClient::new(&config.invoices, &config.http)?;
        Ok(Self::with_apis(
            db,
            config,
            Arc::new(pool_api),
            Arc::new(invoice_api),
        ))
    }

    pub fn with_apis(
        db: Database,
        config: BatchConfig,
        pool_api: Arc<dyn PoolApi>,
        invoice_api: Arc<dyn InvoiceApi>,
    ) -> Self {
        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            pool_api,
            invoice_api,
        }
    }
}

/// The calendar day a date-window job processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
}

impl DayWindow {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(NaiveTime::MIN)
    }

    /// Exclusive end, midnight of the following day.
    pub fn end(&self) -> NaiveDateTime {
        self.start() + Duration::days(1)
    }
}

/// Open the next day window of a date-window job.
///
/// Checks the daily guard, resolves the day after the last processed one and
/// stamps the run start. Errors before stamping when no start date is known.
pub(crate) async fn open_day_window(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<Result<DayWindow, SkipReason>, JobError> {
    let mark = db.load_watermark(job).await?;
    if !mark.is_eligible(RunPeriod::Daily, now) {
        return Ok(Err(SkipReason::AlreadyRan));
    }
    let date = mark.next_window_start().ok_or_else(|| {
        JobError::Date(format!(
            "{job} has no processed date, set one with `batch:watermark set {job} <YYYY-MM-DD>`"
        ))
    })?;
    if date >= now.date() {
        return Ok(Err(SkipReason::WindowOpen(date)));
    }
    db.mark_run_started(job, now).await?;
    Ok(Ok(DayWindow::new(date)))
}

/// Advance a date-window job past `window`.
pub(crate) async fn close_day_window(
    db: &Database,
    job: &str,
    window: DayWindow,
    now: NaiveDateTime,
) -> Result<(), JobError> {
    db.commit_watermark(job, Some(window.date), now).await?;
    Ok(())
}

/// Check a period guard without a processing date and stamp the run start.
/// Returns `false` when the job already ran in this period.
pub(crate) async fn claim_period(
    db: &Database,
    job: &str,
    period: RunPeriod,
    now: NaiveDateTime,
) -> Result<bool, JobError> {
    if !db.is_eligible(job, period, now).await? {
        return Ok(false);
    }
    db.mark_run_started(job, now).await?;
    Ok(true)
}

/// Record the run time of an unguarded job.
pub(crate) async fn record_run(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<(), JobError> {
    db.commit_watermark(job, None, now).await?;
    Ok(())
}

/// One schedulable batch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchJob {
    OfferwallStats,
    DailyTaskStats,
    ShortlinkStats,
    FaucetClaimStats,
    RpsGameStats,
    MinerStats,
    WithdrawStats,
    WithdrawCurrencyStats,
    UserAccountStats,
    UserDailyStats,
    TransactionStats,
    GuildWeeklyCheck,
    CacheGuildMembers,
    UserOnlineCheck,
    UnlockGames,
    FakeAccountCheck,
    CheckPtcPayments,
    MinerShares(Coin),
    MinerPayments,
}

/// Command names and descriptions, in listing order.
pub const COMMANDS: &[(&str, &str)] = &[
    ("batch:offerwall-stats", "Offerwall completion statistics"),
    ("batch:daily-task-stats", "Daily task completion statistics"),
    ("batch:shortlink-stats", "Shortlink statistics and difficulty"),
    ("batch:faucet-claim-stats", "Faucet claim statistics (daily)"),
    ("batch:rps-game-stats", "Rock-paper-scissors game statistics (daily)"),
    ("batch:miner-stats", "Mining payout statistics (daily)"),
    ("batch:withdraw-stats", "Withdrawal statistics (daily)"),
    ("batch:withdraw-currency-stats", "Withdrawal totals per currency (daily)"),
    ("batch:user-account-stats", "New account and referral statistics (daily)"),
    ("batch:user-daily-stats", "Active user statistics (daily)"),
    ("batch:transaction-stats", "Earnings and cost statistics (daily)"),
    ("batch:guild-weekly-check", "Claim reached guild weekly tasks"),
    ("batch:cache-guild-members", "Refresh guild member counts (daily)"),
    ("batch:user-online-check", "Set idle users offline"),
    ("batch:unlock-games", "Release abandoned game matches"),
    ("batch:fake-account-check", "Flag IPs shared by several accounts"),
    ("batch:check-ptc-payments", "Credit paid PTC deposit invoices"),
    ("batch:miner-shares", "Queue miner payouts for one coin (--coin=<xmr|etc|rvn>)"),
    ("batch:miner-payments", "Send queued miner payouts"),
];

impl BatchJob {
    /// Resolve a command name. `Ok(None)` for names that are not jobs.
    pub fn from_command(command: &str, coin: Option<Coin>) -> BatchResult<Option<Self>> {
        let job = match command {
            "batch:offerwall-stats" => BatchJob::OfferwallStats,
            "batch:daily-task-stats" => BatchJob::DailyTaskStats,
            "batch:shortlink-stats" => BatchJob::ShortlinkStats,
            "batch:faucet-claim-stats" => BatchJob::FaucetClaimStats,
            "batch:rps-game-stats" => BatchJob::RpsGameStats,
            "batch:miner-stats" => BatchJob::MinerStats,
            "batch:withdraw-stats" => BatchJob::WithdrawStats,
            "batch:withdraw-currency-stats" => BatchJob::WithdrawCurrencyStats,
            "batch:user-account-stats" => BatchJob::UserAccountStats,
            "batch:user-daily-stats" => BatchJob::UserDailyStats,
            "batch:transaction-stats" => BatchJob::TransactionStats,
            "batch:guild-weekly-check" => BatchJob::GuildWeeklyCheck,
            "batch:cache-guild-members" => BatchJob::CacheGuildMembers,
            "batch:user-online-check" => BatchJob::UserOnlineCheck,
            "batch:unlock-games" => BatchJob::UnlockGames,
            "batch:fake-account-check" => BatchJob::FakeAccountCheck,
            "batch:check-ptc-payments" => BatchJob::CheckPtcPayments,
            "batch:miner-payments" => BatchJob::MinerPayments,
            "batch:miner-shares" => {
                let coin = coin.ok_or_else(|| {
                    BatchError::InvalidInput(
                        "batch:miner-shares requires --coin=<xmr|etc|rvn>".to_string(),
                    )
                })?;
                BatchJob::MinerShares(coin)
            }
            _ => return Ok(None),
        };
        Ok(Some(job))
    }

    /// Jobs the daemon schedules. Miner shares run once per coin.
    pub fn all() -> Vec<BatchJob> {
        let mut jobs = vec![
            BatchJob::OfferwallStats,
            BatchJob::DailyTaskStats,
            BatchJob::ShortlinkStats,
            BatchJob::FaucetClaimStats,
            BatchJob::RpsGameStats,
            BatchJob::MinerStats,
            BatchJob::WithdrawStats,
            BatchJob::WithdrawCurrencyStats,
            BatchJob::UserAccountStats,
            BatchJob::UserDailyStats,
            BatchJob::TransactionStats,
            BatchJob::GuildWeeklyCheck,
            BatchJob::CacheGuildMembers,
            BatchJob::UserOnlineCheck,
            BatchJob::UnlockGames,
            BatchJob::FakeAccountCheck,
            BatchJob::CheckPtcPayments,
        ];
        jobs.extend(Coin::ALL.into_iter().map(BatchJob::MinerShares));
        jobs.push(BatchJob::MinerPayments);
        jobs
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            BatchJob::OfferwallStats => "batch:offerwall-stats",
            BatchJob::DailyTaskStats => "batch:daily-task-stats",
            BatchJob::ShortlinkStats => "batch:shortlink-stats",
            BatchJob::FaucetClaimStats => "batch:faucet-claim-stats",
            BatchJob::RpsGameStats => "batch:rps-game-stats",
            BatchJob::MinerStats => "batch:miner-stats",
            BatchJob::WithdrawStats => "batch:withdraw-stats",
            BatchJob::WithdrawCurrencyStats => "batch:withdraw-currency-stats",
            BatchJob::UserAccountStats => "batch:user-account-stats",
            BatchJob::UserDailyStats => "batch:user-daily-stats",
            BatchJob::TransactionStats => "batch:transaction-stats",
            BatchJob::GuildWeeklyCheck => "batch:guild-weekly-check",
            BatchJob::CacheGuildMembers => "batch:cache-guild-members",
            BatchJob::UserOnlineCheck => "batch:user-online-check",
            BatchJob::UnlockGames => "batch:unlock-games",
            BatchJob::FakeAccountCheck => "batch:fake-account-check",
            BatchJob::CheckPtcPayments => "batch:check-ptc-payments",
            BatchJob::MinerShares(_) => "batch:miner-shares",
            BatchJob::MinerPayments => "batch:miner-payments",
        }
    }

    /// Key of the job's watermark row: the command name without `batch:`,
    /// plus the coin for miner shares.
    pub fn watermark_name(&self) -> String {
        let base = self.command_name().trim_start_matches("batch:");
        match self {
            BatchJob::MinerShares(coin) => format!("{base}-{coin}"),
            _ => base.to_string(),
        }
    }

    pub async fn run(&self, ctx: &JobContext, now: NaiveDateTime) -> Result<JobOutcome, JobError> {
        let db = ctx.db.as_ref();
        let config = ctx.config.as_ref();
        let job = self.watermark_name();
        match self {
            BatchJob::OfferwallStats => run_offerwall_stats(db, &job, now).await,
            BatchJob::DailyTaskStats => run_daily_task_stats(db, &job, now).await,
            BatchJob::ShortlinkStats => run_shortlink_stats(db, &job, now).await,
            BatchJob::FaucetClaimStats => run_faucet_claim_stats(db, &job, now).await,
            BatchJob::RpsGameStats => run_rps_game_stats(db, &job, now).await,
            BatchJob::MinerStats => run_miner_stats(db, &job, now).await,
            BatchJob::WithdrawStats => {
                run_withdraw_stats(db, &job, config.jobs.referral_bonus_rate, now).await
            }
            BatchJob::WithdrawCurrencyStats => run_withdraw_currency_stats(db, &job, now).await,
            BatchJob::UserAccountStats => run_user_account_stats(db, &job, now).await,
            BatchJob::UserDailyStats => run_user_daily_stats(db, &job, now).await,
            BatchJob::TransactionStats => run_transaction_stats(db, &job, now).await,
            BatchJob::GuildWeeklyCheck => run_guild_weekly_check(db, &job, now).await,
            BatchJob::CacheGuildMembers => run_cache_guild_members(db, &job, now).await,
            BatchJob::UserOnlineCheck => {
                run_user_online_check(db, &job, config.jobs.online_timeout_secs, now).await
            }
            BatchJob::UnlockGames => {
                run_unlock_games(db, &job, config.jobs.game_unlock_minutes, now).await
            }
            BatchJob::FakeAccountCheck => {
                run_fake_account_check(db, &job, config.jobs.fraud_claim_lookback_days, now).await
            }
            BatchJob::CheckPtcPayments => {
                run_check_ptc_payments(db, ctx.invoice_api.as_ref(), &config.invoices, &job, now)
                    .await
            }
            BatchJob::MinerShares(coin) => {
                run_miner_shares(db, ctx.pool_api.as_ref(), &config.mining, *coin, &job, now).await
            }
            BatchJob::MinerPayments => run_miner_payments(db, &job, now).await,
        }
    }

    /// Run the job and report its lifecycle through the job event log.
    pub async fn run_logged(
        &self,
        ctx: &JobContext,
        now: NaiveDateTime,
    ) -> Result<JobOutcome, JobError> {
        let run_id = generate_run_id();
        let name = self.watermark_name();
        log_job_event(JobEvent::Started, &name, &run_id, None);

        let result = self.run(ctx, now).await;
        match &result {
            Ok(outcome @ JobOutcome::Completed { .. }) => {
                log_job_event(JobEvent::Completed, &name, &run_id, Some(&outcome.to_string()))
            }
            Ok(JobOutcome::Skipped(reason)) => {
                log_job_event(JobEvent::Skipped, &name, &run_id, Some(&reason.to_string()))
            }
            Err(e) => log_job_event(JobEvent::Failed, &name, &run_id, Some(&e.to_string())),
        }
        result
    }
}

impl fmt::Display for BatchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchJob::MinerShares(coin) => write!(f, "{} --coin={coin}", self.command_name()),
            _ => f.write_str(self.command_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_command_resolves() {
        for (command, _) in COMMANDS {
            let job = BatchJob::from_command(command, Some(Coin::Xmr))
                .unwrap()
                .unwrap();
            assert_eq!(job.command_name(), *command);
        }
        assert_eq!(BatchJob::from_command("batch:nope", None).unwrap(), None);
    }

    #[test]
    fn miner_shares_needs_a_coin() {
        assert!(BatchJob::from_command("batch:miner-shares", None).is_err());
        let job = BatchJob::from_command("batch:miner-shares", Some(Coin::Rvn))
            .unwrap()
            .unwrap();
        assert_eq!(job.watermark_name(), "miner-shares-rvn");
        assert_eq!(job.to_string(), "batch:miner-shares --coin=rvn");
    }

    #[test]
    fn day_window_bounds() {
        let window = DayWindow::new(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(window.start().to_string(), "2024-02-29 00:00:00");
        assert_eq!(window.end().to_string(), "2024-03-01 00:00:00");
    }

    #[test]
    fn batch_errors_map_to_job_errors() {
        let err: JobError = BatchError::UpstreamMissing("no data".into()).into();
        assert!(matches!(err, JobError::Upstream(_)));
        let err: JobError = BatchError::DatabaseError("locked".into()).into();
        assert!(matches!(err, JobError::Database(_)));
    }

    #[test]
    fn daemon_schedules_each_coin() {
        let jobs = BatchJob::all();
        assert_eq!(jobs.len(), COMMANDS.len() + Coin::ALL.len() - 1);
        assert!(jobs.contains(&BatchJob::MinerShares(Coin::Etc)));
    }
}
