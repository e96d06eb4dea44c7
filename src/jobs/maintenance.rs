//! Housekeeping: online flags and abandoned game matches.

use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::store::Database;

use super::{record_run, JobError, JobOutcome};

/// Set users offline whose last action is older than `timeout_secs`.
pub async fn run_user_online_check(
    db: &Database,
    job: &str,
    timeout_secs: i64,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let cutoff = now - Duration::seconds(timeout_secs);
    let updated = db.set_idle_users_offline(cutoff).await?;
    record_run(db, job, now).await?;
    info!(users = updated, cutoff = %cutoff, "Set idle users offline");
    Ok(JobOutcome::completed(updated as usize))
}

/// Release battleship and RPS matches whose client joined more than
/// `unlock_minutes` ago without playing.
pub async fn run_unlock_games(
    db: &Database,
    job: &str,
    unlock_minutes: i64,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let cutoff = now - Duration::minutes(unlock_minutes);
    let ships = db.unlock_stale_ship_matches(cutoff).await?;
    info!(games = ships, "Unlocked battleship games");
    let rps = db.unlock_stale_rps_matches(cutoff).await?;
    info!(games = rps, "Unlocked RPS games");

    record_run(db, job, now).await?;
    Ok(JobOutcome::completed((ships + rps) as usize))
}
