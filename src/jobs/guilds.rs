//! Guild jobs: weekly task claims and the member count cache.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::guild_weekly::check_weekly_tasks;
use crate::store::{Database, RunPeriod};

use super::{claim_period, record_run, JobError, JobOutcome, SkipReason};

/// Claim every weekly task the guilds reached this week.
pub async fn run_guild_weekly_check(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let report = check_weekly_tasks(db, now).await?;
    record_run(db, job, now).await?;
    info!(
        tasks = report.tasks,
        guilds = report.guilds_with_progress,
        claims = report.claims,
        "Guild weekly check completed"
    );
    Ok(JobOutcome::completed(report.claims))
}

/// Store each guild's number of joined members.
pub async fn run_cache_guild_members(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    if !claim_period(db, job, RunPeriod::Daily, now).await? {
        return Ok(JobOutcome::Skipped(SkipReason::AlreadyRan));
    }

    let counts = db.guild_member_counts().await?;
    for count in &counts {
        if count.guild_id <= 0 {
            continue;
        }
        debug!(guild_id = count.guild_id, members = count.members, "Caching member count");
        db.set_guild_members(count.guild_id, count.members).await?;
    }

    record_run(db, job, now).await?;
    info!(guilds = counts.len(), "Guild member counts updated");
    Ok(JobOutcome::completed(counts.len()))
}
