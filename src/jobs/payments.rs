//! PTC credit deposits paid through invoices.

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::config::InvoiceConfig;
use crate::invoice::InvoiceApi;
use crate::store::{Database, Ledger, LedgerEntry, RunPeriod};

use super::{claim_period, JobError, JobOutcome, SkipReason};

/// Ledger reference type of credited deposits.
pub const DEPOSIT_REF_TYPE: &str = "deposit";
/// Invoice hashes this short cannot be real.
const MIN_INVOICE_HASH_LEN: usize = 7;

/// Look up every recent open USD deposit and credit the paid ones.
///
/// A failed lookup only skips that deposit; it is checked again next run.
pub async fn run_check_ptc_payments(
    db: &Database,
    invoices: &dyn InvoiceApi,
    config: &InvoiceConfig,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let interval = Duration::minutes(config.check_interval_minutes);
    if !claim_period(db, job, RunPeriod::Interval(interval), now).await? {
        return Ok(JobOutcome::Skipped(SkipReason::AlreadyRan));
    }

    let since = now - Duration::hours(config.lookback_hours);
    let deposits = db.open_usd_deposits(since).await?;
    if deposits.is_empty() {
        info!("No pending deposits found");
        return Ok(JobOutcome::completed(0));
    }
    info!(deposits = deposits.len(), "Processing pending deposits");

    let mut lookups = 0usize;
    let mut credited = 0usize;
    for deposit in &deposits {
        if deposit.invoice_hash.len() < MIN_INVOICE_HASH_LEN {
            debug!(deposit_id = deposit.deposit_id, "Skipping deposit with invalid invoice");
            continue;
        }
        let status = match invoices.invoice_status(&deposit.invoice_hash).await {
            Ok(status) => status,
            Err(e) => {
                warn!(invoice = %deposit.invoice_hash, error = %e, "Could not load invoice info");
                continue;
            }
        };
        lookups += 1;

        if !status.is_paid() {
            debug!(invoice = %deposit.invoice_hash, status = status.0, "Invoice not paid yet");
            continue;
        }
        if deposit.deposit_id <= 0 || deposit.amount <= 0.0 {
            warn!(deposit_id = deposit.deposit_id, "Paid deposit has no usable amount");
            continue;
        }

        let entry = LedgerEntry {
            account_id: deposit.user_id,
            amount: deposit.amount,
            is_output: false,
            ref_id: deposit.deposit_id,
            ref_type: DEPOSIT_REF_TYPE,
            comment: "PTC Credits Deposit",
            created_by: deposit.user_id,
            touch_online: false,
        };
        match db.execute_transaction(Ledger::UserCredits, &entry, now).await? {
            Some(_) => {
                db.mark_deposit_paid(deposit.deposit_id).await?;
                credited += 1;
                info!(
                    user_id = deposit.user_id,
                    amount = deposit.amount,
                    "Sent PTC credits for paid invoice"
                );
            }
            None => warn!(
                user_id = deposit.user_id,
                amount = deposit.amount,
                "Could not send PTC credits"
            ),
        }
    }

    let credits_used = lookups as f64 * config.credits_per_call;
    info!(lookups, credited, credits_used, "Invoice check completed");
    Ok(JobOutcome::completed(credited))
}
