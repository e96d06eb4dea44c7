//! Miner payout jobs.

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::config::MiningConfig;
use crate::mining::{MinerPayoutEngine, PayoutOutcome, PoolApi};
use crate::store::{Database, Ledger, LedgerEntry};
use crate::types::Coin;

use super::{record_run, JobError, JobOutcome};

/// Ledger reference type of miner payouts.
pub const MINING_REF_TYPE: &str = "mining";

/// Queue payouts of the pool earnings for `coin`.
pub async fn run_miner_shares(
    db: &Database,
    pool: &dyn PoolApi,
    config: &MiningConfig,
    coin: Coin,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let engine = MinerPayoutEngine::new(db, pool, config);
    let outcome = engine.run(coin, now).await?;
    record_run(db, job, now).await?;

    match outcome {
        PayoutOutcome::NoWallet | PayoutOutcome::NothingToPay => Ok(JobOutcome::completed(0)),
        PayoutOutcome::Queued {
            payments,
            total,
            budget,
        } => {
            info!(coin = %coin, payments, total, budget, "Queued miner payments");
            Ok(JobOutcome::completed(payments))
        }
        PayoutOutcome::BudgetExceeded(exceeded) => Err(JobError::BudgetExceeded {
            total: exceeded.total,
            limit: exceeded.limit,
        }),
    }
}

/// Credit every open miner payment to its user's token balance.
pub async fn run_miner_payments(
    db: &Database,
    job: &str,
    now: NaiveDateTime,
) -> Result<JobOutcome, JobError> {
    let open = db.open_miner_payments().await?;
    info!(payments = open.len(), "Sending miner payments");

    let mut sent = 0;
    for payment in &open {
        let comment = format!(
            "Mining Payout {} {}% of shares",
            payment.coin.to_uppercase(),
            payment.shares_percent
        );
        let entry = LedgerEntry {
            account_id: payment.user_id,
            amount: payment.amount_coin,
            is_output: false,
            ref_id: payment.id,
            ref_type: MINING_REF_TYPE,
            comment: &comment,
            created_by: 1,
            touch_online: false,
        };
        match db.execute_transaction(Ledger::UserTokens, &entry, now).await? {
            Some(_) => {
                db.mark_miner_payment_done(payment.id).await?;
                sent += 1;
            }
            None => warn!(
                payment_id = payment.id,
                user_id = payment.user_id,
                "Miner payment could not be booked"
            ),
        }
    }

    record_run(db, job, now).await?;
    Ok(JobOutcome::completed(sent))
}
