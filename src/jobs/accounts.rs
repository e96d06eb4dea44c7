//! Account statistics: sign-ups, referrals and active users.

use chrono::{Datelike, Months, NaiveDateTime, NaiveTime};
use tracing::info;

use crate::aggregate::{stat_key, user_tally, Rollup, RollupContext, Window, TOTAL_MONTH};
use crate::store::Database;

use super::{close_day_window, open_day_window, JobError, JobOutcome};

/// Count the accounts created on the next unprocessed day and credit each
/// referrer.
pub async fn run_user_account_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating account statistics");

    let accounts = db
        .users_created_between(window.start(), window.end())
        .await?;
    let (referrals, _) = user_tally(
        accounts
            .iter()
            .filter(|account| account.ref_user_id != 0)
            .map(|account| (account.ref_user_id, 1.0)),
    );

    let mut ctx = RollupContext::new(db, window.date, now);
    ctx.users(Rollup::new("user-referral", TOTAL_MONTH), &referrals)
        .await?;

    let created = accounts.len() as f64;
    ctx.global("users-total", created).await?;
    ctx.global(&stat_key("users-total", Window::Month, window.date), created)
        .await?;
    ctx.global(&stat_key("users-created", Window::Day, window.date), created)
        .await?;

    close_day_window(db, job, window, now).await?;
    info!(accounts = accounts.len(), referrers = referrals.len(), "Account statistics completed");
    Ok(JobOutcome::completed(accounts.len()))
}

/// Count users active on the next unprocessed day, and snapshot the number
/// of distinct users active in that day's month.
pub async fn run_user_daily_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating active user statistics");

    let active = db
        .count_users_active_between(window.start(), window.end())
        .await?;

    let month_start = window
        .date
        .with_day(1)
        .ok_or_else(|| JobError::Date(format!("no first day for {}", window.date)))?;
    let month_end = month_start
        .checked_add_months(Months::new(1))
        .ok_or_else(|| JobError::Date(format!("no month after {month_start}")))?;
    let unique = db
        .count_users_active_between(
            month_start.and_time(NaiveTime::MIN),
            month_end.and_time(NaiveTime::MIN),
        )
        .await?;

    let ctx = RollupContext::new(db, window.date, now);
    ctx.global(&stat_key("users-active", Window::Month, window.date), active as f64)
        .await?;
    ctx.global(&stat_key("users-active", Window::Day, window.date), active as f64)
        .await?;
    ctx.global_snapshot(&stat_key("users-unique", Window::Month, window.date), unique as f64)
        .await?;

    close_day_window(db, job, window, now).await?;
    info!(active, unique, "Active user statistics completed");
    Ok(JobOutcome::completed(active as usize))
}
