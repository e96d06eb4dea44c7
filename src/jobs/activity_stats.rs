//! Statistics of user activity: offers, daily tasks, shortlinks, faucet
//! claims and rock-paper-scissors games.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::aggregate::{user_tally, Rollup, RollupContext, Tally, TOTAL_MONTH, TOTAL_MONTH_WEEK};
use crate::store::activity::FlaggedSource;
use crate::store::Database;
use crate::types::UserId;

use super::{close_day_window, open_day_window, record_run, JobError, JobOutcome};

/// Offer size by reward amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OfferTier {
    Tiny,
    Small,
    Medium,
    Big,
}

impl OfferTier {
    pub fn for_amount(amount: f64) -> Self {
        if amount >= 50_000.0 {
            OfferTier::Big
        } else if amount >= 5_000.0 {
            OfferTier::Medium
        } else if amount >= 1_000.0 {
            OfferTier::Small
        } else {
            OfferTier::Tiny
        }
    }

    pub fn stat_prefix(&self) -> &'static str {
        match self {
            OfferTier::Tiny => "user-offertiny",
            OfferTier::Small => "user-offersmall",
            OfferTier::Medium => "user-offermed",
            OfferTier::Big => "user-offerbig",
        }
    }

    /// Guild weekly task fed by this tier.
    pub fn guild_task(&self) -> &'static str {
        match self {
            OfferTier::Tiny => "oftiny",
            OfferTier::Small => "ofsmall",
            OfferTier::Medium => "ofmed",
            OfferTier::Big => "ofbig",
        }
    }
}

/// Roll up every unprocessed offerwall completion.
pub async fn run_offerwall_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let offers = db.unprocessed_offers().await?;
    info!(offers = offers.len(), "Generating offerwall statistics");

    let mut tiers: BTreeMap<OfferTier, Tally<UserId>> = BTreeMap::new();
    let mut earned = Tally::new();
    for offer in &offers {
        let Some(user) = UserId::new(offer.user_id) else {
            debug!(id = offer.id, user_id = offer.user_id, "Skipping offer without user");
            continue;
        };
        tiers
            .entry(OfferTier::for_amount(offer.amount))
            .or_default()
            .bump(user);
        earned.add(user, offer.amount);
    }

    let mut ctx = RollupContext::new(db, now.date(), now);
    for (tier, tally) in &tiers {
        let rollup =
            Rollup::new(tier.stat_prefix(), TOTAL_MONTH_WEEK).with_guild_task(tier.guild_task());
        ctx.users(rollup, tally).await?;
    }
    ctx.users(Rollup::new("user-offerearned", TOTAL_MONTH), &earned)
        .await?;
    if !offers.is_empty() {
        ctx.global("offerwalls-total-offers", offers.len() as f64)
            .await?;
    }

    let ids: Vec<i64> = offers.iter().map(|o| o.id).collect();
    db.mark_processed(FlaggedSource::Offers, &ids).await?;
    record_run(db, job, now).await?;

    info!(offers = offers.len(), users = earned.len(), "Offerwall statistics completed");
    Ok(JobOutcome::completed(offers.len()))
}

/// Roll up every unprocessed daily task completion.
pub async fn run_daily_task_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let tasks = db.unprocessed_daily_tasks().await?;
    info!(tasks = tasks.len(), "Generating daily task statistics");

    let (tally, skipped) = user_tally(tasks.iter().map(|t| (t.user_id, 1.0)));
    if skipped > 0 {
        debug!(skipped, "Skipped daily tasks without user");
    }

    let mut ctx = RollupContext::new(db, now.date(), now);
    ctx.users(
        Rollup::new("user-dailys", TOTAL_MONTH_WEEK).with_guild_task("dailytask"),
        &tally,
    )
    .await?;

    let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
    db.mark_processed(FlaggedSource::DailyTasks, &ids).await?;
    record_run(db, job, now).await?;

    Ok(JobOutcome::completed(tasks.len()))
}

/// Difficulty grade of a shortlink from its completion rate.
pub fn shortlink_difficulty(started: i64, completed: i64) -> &'static str {
    let percent = if started > 0 && completed > 0 {
        (100.0 / (started as f64 / completed as f64)).round() as i64
    } else {
        0
    };
    match percent {
        80..=90 => "medium",
        70..=79 => "hard",
        p if p < 70 => "ultra",
        _ => "easy",
    }
}

/// Roll up every unprocessed shortlink visit, update completion rates and
/// re-grade every shortlink.
pub async fn run_shortlink_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let visits = db.unprocessed_shortlink_visits().await?;
    info!(visits = visits.len(), "Generating shortlink statistics");

    let mut rates: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    let mut completed_by_user = Tally::new();
    let mut completed_total = 0usize;
    for visit in &visits {
        let rate = rates.entry(visit.shortlink_id).or_default();
        rate.0 += 1;
        if !visit.is_completed() {
            continue;
        }
        rate.1 += 1;
        completed_total += 1;
        match UserId::new(visit.user_id) {
            Some(user) => completed_by_user.bump(user),
            None => debug!(id = visit.id, "Skipping shortlink visit without user"),
        }
    }

    let mut ctx = RollupContext::new(db, now.date(), now);
    ctx.users(
        Rollup::new("user-shortlink", TOTAL_MONTH_WEEK).with_guild_task("shortlink"),
        &completed_by_user,
    )
    .await?;

    for (shortlink_id, (started, completed)) in &rates {
        if *shortlink_id <= 0 {
            continue;
        }
        db.add_shortlink_rates(*shortlink_id, *started, *completed, now)
            .await?;
    }
    debug!(links = rates.len(), "Updated shortlink completion rates");

    for rate in db.shortlink_rates().await? {
        let difficulty = shortlink_difficulty(rate.started, rate.completed);
        db.set_shortlink_difficulty(rate.shortlink_id, difficulty)
            .await?;
    }

    if completed_total > 0 {
        ctx.global("shortlinks-total-links", completed_total as f64)
            .await?;
    }

    let ids: Vec<i64> = visits.iter().map(|v| v.id).collect();
    db.mark_processed(FlaggedSource::ShortlinkVisits, &ids)
        .await?;
    record_run(db, job, now).await?;

    Ok(JobOutcome::completed(visits.len()))
}

/// Count the faucet claims of the next unprocessed day.
pub async fn run_faucet_claim_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating faucet claim statistics");

    let claims = db.claim_users_between(window.start(), window.end()).await?;
    let (tally, skipped) = user_tally(claims.iter().map(|user| (*user, 1.0)));
    if skipped > 0 {
        debug!(skipped, "Skipped claims without user");
    }

    let mut ctx = RollupContext::new(db, window.date, now);
    ctx.users(Rollup::new("user-claims", TOTAL_MONTH_WEEK), &tally)
        .await?;
    ctx.global("faucet-claims-total", claims.len() as f64)
        .await?;

    close_day_window(db, job, window, now).await?;
    info!(claims = claims.len(), users = tally.len(), "Faucet claim statistics completed");
    Ok(JobOutcome::completed(claims.len()))
}

/// Count the finished RPS games of the next unprocessed day, for host and
/// client alike.
pub async fn run_rps_game_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating RPS game statistics");

    let games = db
        .rps_matches_finished_between(window.start(), window.end())
        .await?;
    let players = games.iter().flat_map(|game| {
        std::iter::once(game.host_user_id)
            .chain(game.client_user_id)
            .map(|user| (user, 1.0))
    });
    let (tally, _) = user_tally(players);

    let mut ctx = RollupContext::new(db, window.date, now);
    ctx.users(Rollup::new("user-rps-game", TOTAL_MONTH), &tally)
        .await?;
    ctx.global("faucet-rps-game-total", games.len() as f64)
        .await?;

    close_day_window(db, job, window, now).await?;
    Ok(JobOutcome::completed(games.len()))
}
