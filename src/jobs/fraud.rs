//! Multi-account heuristics.
//!
//! Unverified users sharing one IP address, in pending withdrawals or in
//! recent faucet claims, are written to the moderation log. Temp-banned
//! users are ignored.

use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::store::activity::IpUse;
use crate::store::Database;

use super::{record_run, JobError, JobOutcome};

pub const WITHDRAW_MULTI_IP: &str = "wth-multi-ip";
pub const CLAIM_MULTI_IP: &str = "cl-multi-ip";
/// `log_level` of moderation warnings.
pub const LOG_LEVEL_WARNING: i64 = 2;

/// Distinct users per IP, in first-seen order, for IPs used by at least
/// two users.
pub fn shared_ips(rows: &[IpUse], banned: &HashSet<i64>) -> BTreeMap<String, Vec<i64>> {
    let mut by_ip: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for row in rows {
        if banned.contains(&row.user_id) || row.ip.len() <= 1 {
            continue;
        }
        let users = by_ip.entry(row.ip.clone()).or_default();
        if !users.contains(&row.user_id) {
            users.push(row.user_id);
        }
    }
    by_ip.retain(|_, users| users.len() >= 2);
    by_ip
}

async fn flag_shared_ips(
    db: &Database,
    log_type: &str,
    message: &str,
    rows: &[IpUse],
    banned: &HashSet<i64>,
    now: NaiveDateTime,
) -> Result<usize, JobError> {
    let shared = shared_ips(rows, banned);
    for (ip, users) in &shared {
        warn!(log_type, ip = %ip, users = users.len(), "{message}");
        let info = format!("{ip}: {}", serde_json::json!(users));
        db.insert_batch_log(log_type, LOG_LEVEL_WARNING, message, &info, now)
            .await?;
    }
    Ok(shared.len())
}

pub async fn run_fake_account_check(
    db: &Database,
    job: &str,
    claim_lookback_days: i64,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let banned = db.tempbanned_user_ids().await?;

    let withdrawals = db.unverified_withdrawal_ips().await?;
    let flagged_withdrawals = flag_shared_ips(
        db,
        WITHDRAW_MULTI_IP,
        "Multiple Users Withdrawn from same IP",
        &withdrawals,
        &banned,
        now,
    )
    .await?;
    info!(
        withdrawals = withdrawals.len(),
        flagged = flagged_withdrawals,
        "Checked withdrawal IPs"
    );

    let since = now - Duration::days(claim_lookback_days);
    let claims = db.unverified_claim_ips_since(since).await?;
    let flagged_claims = flag_shared_ips(
        db,
        CLAIM_MULTI_IP,
        "Multiple Users Claimed from same IP",
        &claims,
        &banned,
        now,
    )
    .await?;
    info!(claims = claims.len(), flagged = flagged_claims, "Checked faucet claim IPs");

    record_run(db, job, now).await?;
    Ok(JobOutcome::completed(withdrawals.len() + claims.len()))
}
