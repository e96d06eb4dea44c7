//! Statistics of money flows: mining payouts, withdrawals and ledger
//! earnings.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::aggregate::{
    stat_key, user_tally, Rollup, RollupContext, Tally, Window, TOTAL, TOTAL_MONTH,
    TOTAL_MONTH_WEEK,
};
use crate::store::{Database, RunPeriod};
use crate::types::{Coin, UserId};

use super::{
    claim_period, close_day_window, open_day_window, record_run, JobError, JobOutcome, SkipReason,
};

/// Sum the coins paid to miners on the next unprocessed day, per coin.
pub async fn run_miner_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating miner statistics");

    let mut ctx = RollupContext::new(db, window.date, now);
    let mut processed = 0;
    for coin in Coin::ALL {
        let payments = db
            .miner_payments_between(coin, window.start(), window.end())
            .await?;
        let (tally, _) = user_tally(payments.iter().map(|p| (p.user_id, p.amount_coin)));

        let prefix = format!("user-nano-{coin}-coin");
        ctx.users(
            Rollup::new(&prefix, TOTAL_MONTH_WEEK).with_guild_task(coin.guild_task_key()),
            &tally,
        )
        .await?;
        info!(coin = %coin, payments = payments.len(), "Processed miner payments");
        processed += payments.len();
    }

    close_day_window(db, job, window, now).await?;
    Ok(JobOutcome::completed(processed))
}

/// Count withdrawals sent on the next unprocessed day, their coins, and the
/// referral bonus they earn the referrer.
pub async fn run_withdraw_stats(
    db: &Database,
    job: &str,
    referral_bonus_rate: f64,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating withdrawal statistics");

    let withdrawals = db
        .withdrawals_sent_between(window.start(), window.end())
        .await?;

    let mut count = Tally::new();
    let mut coins = Tally::new();
    let mut ref_bonus = Tally::new();
    for wth in &withdrawals {
        if let Some(user) = UserId::new(wth.user_id) {
            count.bump(user);
            coins.add(user, wth.amount);
        }
        if let Some(referrer) = UserId::new(wth.ref_user_id) {
            ref_bonus.add(referrer, wth.amount * referral_bonus_rate);
        }
    }
    debug!(users = count.len(), referrers = ref_bonus.len(), "Grouped withdrawals");

    let mut ctx = RollupContext::new(db, window.date, now);
    ctx.users(Rollup::new("user-wth-amount", TOTAL_MONTH), &count)
        .await?;
    ctx.users(Rollup::new("user-wth-coins", TOTAL_MONTH), &coins)
        .await?;
    ctx.users(Rollup::new("user-ref-bonus", TOTAL_MONTH), &ref_bonus)
        .await?;

    close_day_window(db, job, window, now).await?;
    Ok(JobOutcome::completed(withdrawals.len()))
}

/// Recompute withdrawal totals per currency from every completed withdrawal.
/// All counters are overwritten, so a rerun converges.
pub async fn run_withdraw_currency_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    if !claim_period(db, job, RunPeriod::Daily, now).await? {
        return Ok(JobOutcome::Skipped(SkipReason::AlreadyRan));
    }
    let withdrawals = db.done_withdrawals().await?;
    info!(withdrawals = withdrawals.len(), "Generating withdrawal currency statistics");

    let mut per_user: BTreeMap<String, Tally<UserId>> = BTreeMap::new();
    let mut count_per_coin: BTreeMap<String, f64> = BTreeMap::new();
    let mut paid_per_coin: BTreeMap<String, f64> = BTreeMap::new();
    let mut coins_total = 0.0;
    for wth in &withdrawals {
        coins_total += wth.amount;
        let coin = wth.currency.trim().to_lowercase();
        if coin.is_empty() {
            continue;
        }
        if let Some(user) = UserId::new(wth.user_id) {
            per_user.entry(coin.clone()).or_default().bump(user);
        }
        *count_per_coin.entry(coin.clone()).or_default() += 1.0;
        *paid_per_coin.entry(coin).or_default() += wth.amount_paid;
    }

    let mut ctx = RollupContext::new(db, now.date(), now);
    for (coin, tally) in &per_user {
        let prefix = format!("user-wth-{coin}");
        ctx.users(Rollup::new(&prefix, TOTAL).replacing(), tally)
            .await?;
    }
    for (coin, count) in &count_per_coin {
        ctx.global_snapshot(&format!("wth-amount-{coin}-total"), *count)
            .await?;
    }
    for (coin, paid) in &paid_per_coin {
        ctx.global_snapshot(&format!("wth-crypto-{coin}-total"), *paid)
            .await?;
    }
    ctx.global_snapshot("wth-coins-total", coins_total).await?;

    record_run(db, job, now).await?;
    Ok(JobOutcome::completed(withdrawals.len()))
}

/// Sum the ledger earnings of the next unprocessed day per user, and per
/// reference type as platform cost.
pub async fn run_transaction_stats(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let window = match open_day_window(db, job, now).await? {
        Ok(window) => window,
        Err(reason) => return Ok(JobOutcome::Skipped(reason)),
    };
    info!(date = %window.date, "Generating transaction statistics");

    let earnings = db.earnings_between(window.start(), window.end()).await?;
    let (tally, _) = user_tally(earnings.iter().map(|e| (e.user_id, e.amount)));
    let mut cost_by_type: BTreeMap<&str, f64> = BTreeMap::new();
    for earning in &earnings {
        *cost_by_type.entry(earning.ref_type.as_str()).or_default() += earning.amount;
    }

    let mut ctx = RollupContext::new(db, window.date, now);
    ctx.users(Rollup::new("user-earnings", TOTAL_MONTH_WEEK), &tally)
        .await?;
    for (ref_type, amount) in &cost_by_type {
        let prefix = format!("cost-{ref_type}");
        for window_kind in [Window::Month, Window::Week] {
            ctx.global(&stat_key(&prefix, window_kind, window.date), *amount)
                .await?;
        }
    }

    close_day_window(db, job, window, now).await?;
    info!(
        transactions = earnings.len(),
        users = tally.len(),
        types = cost_by_type.len(),
        "Transaction statistics completed"
    );
    Ok(JobOutcome::completed(earnings.len()))
}
