//! Integration tests for housekeeping, fraud and deposit jobs.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use faucet_batch::config::{DatabaseConfig, InvoiceConfig};
use faucet_batch::errors::{BatchError, BatchResult};
use faucet_batch::invoice::{InvoiceApi, InvoiceStatus};
use faucet_batch::jobs::fraud::{CLAIM_MULTI_IP, LOG_LEVEL_WARNING, WITHDRAW_MULTI_IP};
use faucet_batch::jobs::{
    run_check_ptc_payments, run_fake_account_check, run_unlock_games, run_user_online_check,
    JobOutcome, SkipReason,
};
use faucet_batch::store::{Database, Ledger};
use std::collections::HashMap;
use std::sync::Mutex;

/// Helper to create a migrated in-memory database.
async fn setup_test_db() -> Database {
    let config = DatabaseConfig {
        db_type: "sqlite".to_string(),
        sqlite_url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let db = Database::connect(&config)
        .await
        .expect("failed to create database");
    db.migrate().await.expect("failed to apply schema");
    db
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

async fn exec(db: &Database, sql: &str) {
    match db {
        Database::SQLite(pool) => {
            sqlx::query(sql)
                .execute(pool)
                .await
                .expect("failed to run fixture statement");
        }
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    }
}

async fn scalar(db: &Database, sql: &str) -> i64 {
    match db {
        Database::SQLite(pool) => sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(pool)
            .await
            .expect("failed to read fixture value"),
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_user_online_check_sets_idle_users_offline() {
    let db = setup_test_db().await;
    exec(
        &db,
        "INSERT INTO users (user_id, is_online, last_action, created_date) VALUES \
         (1, 1, '2024-03-05 09:00:00', '2024-01-01 00:00:00'), \
         (2, 1, '2024-03-05 11:30:00', '2024-01-01 00:00:00'), \
         (3, 1, NULL, '2024-01-01 00:00:00'), \
         (4, 0, '2024-03-01 00:00:00', '2024-01-01 00:00:00')",
    )
    .await;

    let outcome = run_user_online_check(&db, "user-online-check", 3600, at(2024, 3, 5, 12, 0))
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(2));
    assert_eq!(scalar(&db, "SELECT COUNT(*) FROM users WHERE is_online = 1").await, 1);
    assert_eq!(scalar(&db, "SELECT is_online FROM users WHERE user_id = 2").await, 1);
}

#[tokio::test]
async fn test_unlock_games_releases_abandoned_matches() {
    let db = setup_test_db().await;
    exec(
        &db,
        "INSERT INTO ship_match (match_id, host_user_id, client_user_id, client_grid, date_matched) VALUES \
         (1, 5, 7, NULL, '2024-03-05 11:00:00'), \
         (2, 5, 8, '[[0,1]]', '2024-03-05 11:00:00'), \
         (3, 5, 9, NULL, '2024-03-05 11:58:00')",
    )
    .await;
    exec(
        &db,
        "INSERT INTO rps_match (match_id, host_user_id, client_user_id, date_created, date_matched, date_finished) VALUES \
         (1, 5, 7, '2024-03-05 10:00:00', '2024-03-05 11:00:00', NULL), \
         (2, 5, 8, '2024-03-05 10:00:00', '2024-03-05 11:00:00', '2024-03-05 11:05:00')",
    )
    .await;

    let outcome = run_unlock_games(&db, "unlock-games", 10, at(2024, 3, 5, 12, 0))
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(2));

    assert_eq!(
        scalar(&db, "SELECT COUNT(*) FROM ship_match WHERE client_user_id IS NULL").await,
        1
    );
    assert_eq!(
        scalar(&db, "SELECT COUNT(*) FROM ship_match WHERE match_id = 1 AND date_matched IS NULL").await,
        1
    );
    assert_eq!(
        scalar(&db, "SELECT COUNT(*) FROM rps_match WHERE client_user_id IS NULL").await,
        1
    );
}

#[tokio::test]
async fn test_fake_account_check_logs_shared_ips() {
    let db = setup_test_db().await;
    exec(
        &db,
        "INSERT INTO users (user_id, is_verified, created_date) VALUES \
         (5, 0, '2024-01-01 00:00:00'), (6, 0, '2024-01-01 00:00:00'), \
         (7, 0, '2024-01-01 00:00:00'), (8, 1, '2024-01-01 00:00:00'), \
         (9, 0, '2024-01-01 00:00:00')",
    )
    .await;
    exec(
        &db,
        "INSERT INTO user_setting (user_id, setting_name, setting_value) VALUES (9, 'user-tempban', '1')",
    )
    .await;
    exec(
        &db,
        "INSERT INTO withdrawal (user_id, amount, currency, state, ip, date_requested) VALUES \
         (5, 100, 'BTC', 'new', '10.0.0.1', '2024-03-05 10:00:00'), \
         (6, 100, 'BTC', 'new', '10.0.0.1', '2024-03-05 10:00:00'), \
         (8, 100, 'BTC', 'new', '10.0.0.1', '2024-03-05 10:00:00'), \
         (7, 100, 'BTC', 'done', '10.0.0.2', '2024-03-05 10:00:00'), \
         (9, 100, 'BTC', 'new', '10.0.0.2', '2024-03-05 10:00:00')",
    )
    .await;
    exec(
        &db,
        "INSERT INTO faucet_claim (user_id, claim_ip, date) VALUES \
         (5, '10.0.0.3', '2024-03-04 10:00:00'), \
         (5, '10.0.0.3', '2024-03-04 11:00:00'), \
         (7, '10.0.0.3', '2024-03-05 10:00:00'), \
         (6, '10.0.0.4', '2024-01-01 10:00:00'), \
         (7, '10.0.0.4', '2024-01-01 10:00:00')",
    )
    .await;

    let now = at(2024, 3, 5, 12, 0);
    run_fake_account_check(&db, "fake-account-check", 7, now)
        .await
        .expect("job failed");

    let withdrawals = db.batch_logs(WITHDRAW_MULTI_IP).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].log_level, LOG_LEVEL_WARNING);
    assert_eq!(withdrawals[0].log_message, "Multiple Users Withdrawn from same IP");
    assert_eq!(withdrawals[0].log_info, "10.0.0.1: [5,6]");

    // Claims older than the lookback window are ignored.
    let claims = db.batch_logs(CLAIM_MULTI_IP).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].log_info, "10.0.0.3: [5,7]");
    assert_eq!(claims[0].log_date, now);
}

/// Invoice API answering from a fixed table, recording every lookup.
#[derive(Default)]
struct ScriptedInvoices {
    statuses: HashMap<String, i64>,
    lookups: Mutex<Vec<String>>,
}

#[async_trait]
impl InvoiceApi for ScriptedInvoices {
    async fn invoice_status(&self, invoice_hash: &str) -> BatchResult<InvoiceStatus> {
        self.lookups.lock().unwrap().push(invoice_hash.to_string());
        self.statuses
            .get(invoice_hash)
            .map(|status| InvoiceStatus(*status))
            .ok_or_else(|| BatchError::UpstreamMissing(format!("unknown invoice {invoice_hash}")))
    }
}

#[tokio::test]
async fn test_ptc_payments_credit_paid_invoices() {
    let db = setup_test_db().await;
    exec(
        &db,
        "INSERT INTO users (user_id, credit_balance, created_date) VALUES \
         (5, 10, '2024-01-01 00:00:00'), (7, 0, '2024-01-01 00:00:00')",
    )
    .await;
    exec(
        &db,
        "INSERT INTO ptc_deposit (deposit_id, user_id, amount, coin, invoice_hash, date) VALUES \
         (1, 5, 25, 'USD', 'inv-paid-001', '2024-03-05 11:00:00'), \
         (2, 7, 40, 'USD', 'inv-open-002', '2024-03-05 11:10:00'), \
         (3, 7, 15, 'USD', 'inv-gone-003', '2024-03-05 11:20:00'), \
         (4, 7, 15, 'USD', 'short', '2024-03-05 11:20:00'), \
         (5, 7, 99, 'USD', 'inv-paid-005', '2024-03-05 06:00:00'), \
         (6, 7, 99, 'BTC', 'inv-paid-006', '2024-03-05 11:30:00')",
    )
    .await;

    let invoices = ScriptedInvoices {
        statuses: HashMap::from([
            ("inv-paid-001".to_string(), 3),
            ("inv-open-002".to_string(), 0),
            ("inv-paid-005".to_string(), 2),
            ("inv-paid-006".to_string(), 2),
        ]),
        ..Default::default()
    };
    let config = InvoiceConfig::default();
    let now = at(2024, 3, 5, 12, 0);

    let outcome = run_check_ptc_payments(&db, &invoices, &config, "check-ptc-payments", now)
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(1));

    // Only recent USD deposits with a plausible hash are looked up.
    let looked_up = invoices.lookups.lock().unwrap().clone();
    assert_eq!(looked_up, vec!["inv-paid-001", "inv-open-002", "inv-gone-003"]);

    let rows = db.ledger_rows(Ledger::UserCredits, 5).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].balance_before, 10.0);
    assert_eq!(rows[0].balance_after, 35.0);
    assert_eq!(rows[0].comment, "PTC Credits Deposit");
    assert_eq!(rows[0].created_by, 5);
    assert_eq!(
        scalar(&db, "SELECT sent FROM ptc_deposit WHERE deposit_id = 1").await,
        1
    );
    assert_eq!(
        scalar(&db, "SELECT sent FROM ptc_deposit WHERE deposit_id = 2").await,
        0
    );

    // The interval guard holds off the next check.
    let outcome = run_check_ptc_payments(
        &db,
        &invoices,
        &config,
        "check-ptc-payments",
        at(2024, 3, 5, 12, 10),
    )
    .await
    .expect("job failed");
    assert_eq!(outcome, JobOutcome::Skipped(SkipReason::AlreadyRan));

    let outcome = run_check_ptc_payments(
        &db,
        &invoices,
        &config,
        "check-ptc-payments",
        at(2024, 3, 5, 12, 45),
    )
    .await
    .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(0));
    assert!(db.ledger_rows(Ledger::UserCredits, 7).await.unwrap().is_empty());
}
