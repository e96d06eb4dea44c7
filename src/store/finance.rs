//! Withdrawals, ledger earnings, miner payments, PTC deposits and the
//! warning log.

use chrono::NaiveDateTime;
use sqlx::FromRow;

use super::activity::IpUse;
use super::{with_pool, Database};
use crate::errors::BatchResult;
use crate::types::Coin;

/// A sent withdrawal together with the requester's referrer.
#[derive(Debug, Clone, FromRow)]
pub struct SentWithdrawal {
    pub user_id: i64,
    pub amount: f64,
    pub ref_user_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DoneWithdrawal {
    pub user_id: i64,
    pub currency: String,
    pub amount: f64,
    pub amount_paid: f64,
}

/// Incoming user ledger movement.
#[derive(Debug, Clone, FromRow)]
pub struct Earning {
    pub user_id: i64,
    pub amount: f64,
    pub ref_type: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct MinerPayment {
    pub id: i64,
    pub user_id: i64,
    pub coin: String,
    pub worker: String,
    pub shares_percent: f64,
    pub amount_coin: f64,
    pub state: String,
    pub date: NaiveDateTime,
}

/// A queued miner payment before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMinerPayment {
    pub user_id: i64,
    pub coin: Coin,
    pub worker: String,
    pub hashrate: f64,
    pub hashrate_percent: f64,
    pub shares: f64,
    pub shares_percent: f64,
    pub amount_coin: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingDeposit {
    pub deposit_id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub invoice_hash: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct BatchLogRow {
    pub log_type: String,
    pub log_level: i64,
    pub log_message: String,
    pub log_info: String,
    pub log_date: NaiveDateTime,
}

impl Database {
    pub async fn withdrawals_sent_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<SentWithdrawal>> {
        let rows = with_pool!(
            self,
            "SELECT w.user_id, w.amount, u.ref_user_id FROM withdrawal w \
             JOIN users u ON u.user_id = w.user_id \
             WHERE w.state = 'done' AND w.date_sent >= ? AND w.date_sent < ?",
            |pool, sql| {
                sqlx::query_as::<_, SentWithdrawal>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn done_withdrawals(&self) -> BatchResult<Vec<DoneWithdrawal>> {
        let rows = with_pool!(
            self,
            "SELECT user_id, currency, amount, amount_paid FROM withdrawal WHERE state = 'done'",
            |pool, sql| {
                sqlx::query_as::<_, DoneWithdrawal>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// Request IPs of new withdrawals from unverified users.
    pub async fn unverified_withdrawal_ips(&self) -> BatchResult<Vec<IpUse>> {
        let rows = with_pool!(
            self,
            "SELECT w.user_id, w.ip FROM withdrawal w \
             JOIN users u ON u.user_id = w.user_id \
             WHERE w.state = 'new' AND u.is_verified = 0",
            |pool, sql| sqlx::query_as::<_, IpUse>(sql).fetch_all(pool).await
        )?;
        Ok(rows)
    }

    /// Incoming user token movements inside `[start, end)`.
    pub async fn earnings_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<Earning>> {
        let rows = with_pool!(
            self,
            "SELECT account_id AS user_id, amount, ref_type FROM user_transaction \
             WHERE is_output = 0 AND date >= ? AND date < ?",
            |pool, sql| {
                sqlx::query_as::<_, Earning>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn miner_payments_between(
        &self,
        coin: Coin,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<MinerPayment>> {
        let rows = with_pool!(
            self,
            "SELECT id, user_id, coin, worker, shares_percent, amount_coin, state, date \
             FROM miner_payment WHERE coin = ? AND date >= ? AND date < ?",
            |pool, sql| {
                sqlx::query_as::<_, MinerPayment>(sql)
                    .bind(coin.as_str())
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn open_miner_payments(&self) -> BatchResult<Vec<MinerPayment>> {
        let rows = with_pool!(
            self,
            "SELECT id, user_id, coin, worker, shares_percent, amount_coin, state, date \
             FROM miner_payment WHERE state = 'open' ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, MinerPayment>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn insert_miner_payment(
        &self,
        payment: &NewMinerPayment,
        now: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO miner_payment (user_id, coin, worker, hashrate, hashrate_percent, \
             shares, shares_percent, amount_coin, state, date) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'open', ?)",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(payment.user_id)
                    .bind(payment.coin.as_str())
                    .bind(&payment.worker)
                    .bind(payment.hashrate)
                    .bind(payment.hashrate_percent)
                    .bind(payment.shares)
                    .bind(payment.shares_percent)
                    .bind(payment.amount_coin)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn mark_miner_payment_done(&self, id: i64) -> BatchResult<()> {
        with_pool!(
            self,
            "UPDATE miner_payment SET state = 'done' WHERE id = ?",
            |pool, sql| sqlx::query(sql).bind(id).execute(pool).await
        )?;
        Ok(())
    }

    /// US dollar value of one unit of a coin, from the wallet table.
    pub async fn coin_dollar_value(&self, coin: Coin) -> BatchResult<Option<f64>> {
        let value = with_pool!(
            self,
            "SELECT dollar_val FROM coin_wallet WHERE coin_sign = ?",
            |pool, sql| {
                sqlx::query_scalar::<_, f64>(sql)
                    .bind(coin.sign())
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(value)
    }

    pub async fn cached_pool_balance(&self, coin: Coin) -> BatchResult<Option<f64>> {
        let value = with_pool!(
            self,
            "SELECT balance FROM pool_balance_cache WHERE coin = ?",
            |pool, sql| {
                sqlx::query_scalar::<_, f64>(sql)
                    .bind(coin.as_str())
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(value)
    }

    pub async fn set_cached_pool_balance(
        &self,
        coin: Coin,
        balance: f64,
        now: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO pool_balance_cache (coin, balance, last_updated) VALUES (?, ?, ?) \
             ON CONFLICT (coin) DO UPDATE SET balance = excluded.balance, last_updated = excluded.last_updated",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(coin.as_str())
                    .bind(balance)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    /// Unsent USD deposits created since `since`.
    pub async fn open_usd_deposits(
        &self,
        since: NaiveDateTime,
    ) -> BatchResult<Vec<PendingDeposit>> {
        let rows = with_pool!(
            self,
            "SELECT deposit_id, user_id, amount, invoice_hash FROM ptc_deposit \
             WHERE coin = 'USD' AND sent = 0 AND date >= ? ORDER BY deposit_id",
            |pool, sql| {
                sqlx::query_as::<_, PendingDeposit>(sql)
                    .bind(since)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn mark_deposit_paid(&self, deposit_id: i64) -> BatchResult<()> {
        with_pool!(
            self,
            "UPDATE ptc_deposit SET received = 1, sent = 1 WHERE deposit_id = ?",
            |pool, sql| sqlx::query(sql).bind(deposit_id).execute(pool).await
        )?;
        Ok(())
    }

    /// Append a row to the warning log read by moderators.
    pub async fn insert_batch_log(
        &self,
        log_type: &str,
        log_level: i64,
        message: &str,
        info: &str,
        now: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO batch_log (log_type, log_level, log_message, log_info, log_date) \
             VALUES (?, ?, ?, ?, ?)",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(log_type)
                    .bind(log_level)
                    .bind(message)
                    .bind(info)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn batch_logs(&self, log_type: &str) -> BatchResult<Vec<BatchLogRow>> {
        let rows = with_pool!(
            self,
            "SELECT log_type, log_level, log_message, log_info, log_date FROM batch_log \
             WHERE log_type = ? ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, BatchLogRow>(sql)
                    .bind(log_type)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }
}
