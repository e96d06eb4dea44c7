//! Balance ledgers.
//!
//! Every balance change writes one ledger row holding the balance before and
//! after the change, then updates the account's balance column.

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use tracing::{debug, warn};

use super::{with_pool, Database};
use crate::errors::BatchResult;

/// Which balance a transaction moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    /// User token balance.
    UserTokens,
    /// User PTC advertising credits.
    UserCredits,
    /// Guild token balance.
    Guild,
}

impl Ledger {
    fn account_table(&self) -> &'static str {
        match self {
            Ledger::UserTokens | Ledger::UserCredits => "users",
            Ledger::Guild => "guild",
        }
    }

    fn account_column(&self) -> &'static str {
        match self {
            Ledger::UserTokens | Ledger::UserCredits => "user_id",
            Ledger::Guild => "guild_id",
        }
    }

    fn balance_column(&self) -> &'static str {
        match self {
            Ledger::UserTokens | Ledger::Guild => "token_balance",
            Ledger::UserCredits => "credit_balance",
        }
    }

    fn transaction_table(&self) -> &'static str {
        match self {
            Ledger::UserTokens => "user_transaction",
            Ledger::UserCredits => "credit_transaction",
            Ledger::Guild => "guild_transaction",
        }
    }
}

/// Description of one balance movement.
#[derive(Debug, Clone)]
pub struct LedgerEntry<'a> {
    pub account_id: i64,
    pub amount: f64,
    pub is_output: bool,
    pub ref_id: i64,
    pub ref_type: &'a str,
    pub comment: &'a str,
    pub created_by: i64,
    /// Mark the user online and bump their last action (user token ledger only).
    pub touch_online: bool,
}

/// A stored ledger row.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub transaction_id: String,
    pub account_id: i64,
    pub amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub is_output: i64,
    pub ref_id: i64,
    pub ref_type: String,
    pub comment: String,
    pub created_by: i64,
    pub date: NaiveDateTime,
}

/// Random transaction id: hex SHA-256 of fresh random bytes.
pub fn new_transaction_id() -> String {
    let seed: [u8; 32] = rand::random();
    hex::encode(Sha256::digest(seed))
}

impl Database {
    /// Apply one ledger entry.
    ///
    /// Returns the transaction id, or `None` when the entry was rejected:
    /// negative amount, non-positive account id, unknown account, or an
    /// identical entry already booked at the same instant.
    pub async fn execute_transaction(
        &self,
        ledger: Ledger,
        entry: &LedgerEntry<'_>,
        now: NaiveDateTime,
    ) -> BatchResult<Option<String>> {
        if entry.amount < 0.0 || entry.account_id <= 0 {
            warn!(
                account_id = entry.account_id,
                amount = entry.amount,
                "Rejected ledger entry"
            );
            return Ok(None);
        }

        let balance_sql = format!(
            "SELECT {balance} FROM {table} WHERE {id} = ?",
            balance = ledger.balance_column(),
            table = ledger.account_table(),
            id = ledger.account_column(),
        );
        let balance = with_pool!(self, &balance_sql, |pool, sql| {
            sqlx::query_scalar::<_, f64>(sql)
                .bind(entry.account_id)
                .fetch_optional(pool)
                .await
        })?;
        let Some(balance_before) = balance else {
            debug!(account_id = entry.account_id, "Ledger account not found");
            return Ok(None);
        };

        let duplicate_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE account_id = ? AND amount = ? AND date = ? \
             AND ref_id = ? AND ref_type = ? AND comment = ?",
            ledger.transaction_table()
        );
        let duplicates = with_pool!(self, &duplicate_sql, |pool, sql| {
            sqlx::query_scalar::<_, i64>(sql)
                .bind(entry.account_id)
                .bind(entry.amount)
                .bind(now)
                .bind(entry.ref_id)
                .bind(entry.ref_type)
                .bind(entry.comment)
                .fetch_one(pool)
                .await
        })?;
        if duplicates > 0 {
            warn!(
                account_id = entry.account_id,
                ref_type = entry.ref_type,
                "Duplicate ledger entry skipped"
            );
            return Ok(None);
        }

        let balance_after = if entry.is_output {
            balance_before - entry.amount
        } else {
            balance_before + entry.amount
        };
        let transaction_id = new_transaction_id();

        let insert_sql = format!(
            "INSERT INTO {} (transaction_id, account_id, amount, balance_before, balance_after, \
             is_output, ref_id, ref_type, comment, created_by, date) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ledger.transaction_table()
        );
        with_pool!(self, &insert_sql, |pool, sql| {
            sqlx::query(sql)
                .bind(&transaction_id)
                .bind(entry.account_id)
                .bind(entry.amount)
                .bind(balance_before)
                .bind(balance_after)
                .bind(i64::from(entry.is_output))
                .bind(entry.ref_id)
                .bind(entry.ref_type)
                .bind(entry.comment)
                .bind(entry.created_by)
                .bind(now)
                .execute(pool)
                .await
        })?;

        let touch = entry.touch_online && ledger == Ledger::UserTokens;
        let update_sql = if touch {
            format!(
                "UPDATE {table} SET {balance} = ?, is_online = 1, last_action = ? WHERE {id} = ?",
                table = ledger.account_table(),
                balance = ledger.balance_column(),
                id = ledger.account_column(),
            )
        } else {
            format!(
                "UPDATE {table} SET {balance} = ? WHERE {id} = ?",
                table = ledger.account_table(),
                balance = ledger.balance_column(),
                id = ledger.account_column(),
            )
        };
        with_pool!(self, &update_sql, |pool, sql| {
            let query = sqlx::query(sql).bind(balance_after);
            let query = if touch { query.bind(now) } else { query };
            query.bind(entry.account_id).execute(pool).await
        })?;

        debug!(
            transaction_id = %transaction_id,
            account_id = entry.account_id,
            amount = entry.amount,
            balance_after,
            "Ledger entry booked"
        );

        Ok(Some(transaction_id))
    }

    /// Ledger rows of one account, oldest first.
    pub async fn ledger_rows(
        &self,
        ledger: Ledger,
        account_id: i64,
    ) -> BatchResult<Vec<LedgerRow>> {
        let select_sql = format!(
            "SELECT transaction_id, account_id, amount, balance_before, balance_after, is_output, \
             ref_id, ref_type, comment, created_by, date FROM {} WHERE account_id = ? ORDER BY date",
            ledger.transaction_table()
        );
        let rows = with_pool!(self, &select_sql, |pool, sql| {
            sqlx::query_as::<_, LedgerRow>(sql)
                .bind(account_id)
                .fetch_all(pool)
                .await
        })?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_hex_sha256() {
        let a = new_transaction_id();
        let b = new_transaction_id();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
