//! Database tests: counters, watermarks, ledgers and the schema itself.

#![cfg(feature = "sqlite")]

use chrono::{NaiveDate, NaiveDateTime};
use faucet_batch::config::DatabaseConfig;
use faucet_batch::store::{Database, Ledger, LedgerEntry, RunPeriod};
use faucet_batch::types::{GuildId, Subject, UserId};

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

fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let db = setup_test_db().await;
    db.migrate().await.expect("second migration should succeed");
    assert_eq!(db.backend(), "sqlite");
}

#[tokio::test]
async fn test_unsupported_backend_is_rejected() {
    let config = DatabaseConfig {
        db_type: "mysql".to_string(),
        ..Default::default()
    };
    assert!(Database::connect(&config).await.is_err());
}

#[tokio::test]
async fn test_counter_contributions_add_up() {
    let db = setup_test_db().await;
    let user = Subject::User(UserId::new(5).unwrap());
    let now = at(2024, 3, 6, 12);

    assert_eq!(db.counter_value(user, "user-claims-total").await.unwrap(), 0.0);
    assert_eq!(db.upsert_counter(user, "user-claims-total", 2.0, now).await.unwrap(), 2.0);
    assert_eq!(
        db.upsert_counter(user, "user-claims-total", 3.0, at(2024, 3, 7, 12))
            .await
            .unwrap(),
        5.0
    );

    let counter = db
        .get_counter(user, "user-claims-total")
        .await
        .unwrap()
        .expect("counter exists");
    assert_eq!(counter.subject_kind, "user");
    assert_eq!(counter.subject_id, 5);
    assert_eq!(counter.value, 5.0);
    assert_eq!(counter.last_updated, at(2024, 3, 7, 12));
}

#[tokio::test]
async fn test_counters_are_scoped_by_subject() {
    let db = setup_test_db().await;
    let now = at(2024, 3, 6, 12);
    let user = Subject::User(UserId::new(3).unwrap());
    let guild = Subject::Guild(GuildId::new(3).unwrap());

    db.upsert_counter(user, "x-total", 1.0, now).await.unwrap();
    db.upsert_counter(guild, "x-total", 10.0, now).await.unwrap();
    db.upsert_counter(Subject::Global, "x-total", 100.0, now)
        .await
        .unwrap();

    assert_eq!(db.counter_value(user, "x-total").await.unwrap(), 1.0);
    assert_eq!(db.counter_value(guild, "x-total").await.unwrap(), 10.0);
    assert_eq!(db.counter_value(Subject::Global, "x-total").await.unwrap(), 100.0);
}

#[tokio::test]
async fn test_replace_counter_overwrites() {
    let db = setup_test_db().await;
    let now = at(2024, 3, 6, 12);

    db.upsert_counter(Subject::Global, "wth-coins-total", 40.0, now)
        .await
        .unwrap();
    let value = db
        .replace_counter(Subject::Global, "wth-coins-total", 25.0, now)
        .await
        .unwrap();
    assert_eq!(value, 25.0);
    assert_eq!(
        db.counter_value(Subject::Global, "wth-coins-total").await.unwrap(),
        25.0
    );

    let user = Subject::User(UserId::new(5).unwrap());
    db.upsert_counter(user, "a-total", 1.0, now).await.unwrap();
    db.upsert_counter(user, "b-total", 2.0, now).await.unwrap();
    let keys: Vec<String> = db
        .counters_for(user)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.stat_key)
        .collect();
    assert_eq!(keys, vec!["a-total", "b-total"]);
}

#[tokio::test]
async fn test_watermark_daily_guard() {
    let db = setup_test_db().await;
    let job = "faucet-claim-stats";
    let morning = at(2024, 3, 6, 0);

    assert!(db.is_eligible(job, RunPeriod::Daily, morning).await.unwrap());

    db.mark_run_started(job, morning).await.unwrap();
    assert!(!db.is_eligible(job, RunPeriod::Daily, at(2024, 3, 6, 23)).await.unwrap());
    assert!(db.is_eligible(job, RunPeriod::Daily, at(2024, 3, 7, 0)).await.unwrap());

    // Committing without a date keeps the stored one.
    let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    db.commit_watermark(job, Some(day), morning).await.unwrap();
    db.commit_watermark(job, None, at(2024, 3, 6, 1)).await.unwrap();
    let mark = db.load_watermark(job).await.unwrap();
    assert_eq!(mark.last_processed_date, Some(day));
    assert_eq!(mark.last_run_at, Some(at(2024, 3, 6, 1)));
    assert_eq!(mark.next_window_start(), NaiveDate::from_ymd_opt(2024, 3, 6));
}

#[tokio::test]
async fn test_watermark_operator_commands() {
    let db = setup_test_db().await;
    let job = "miner-stats";

    assert!(!db.reset_watermark_run(job).await.unwrap());
    let mark = db.load_watermark(job).await.unwrap();
    assert_eq!(mark.last_processed_date, None);
    assert_eq!(mark.last_run_at, None);

    let day = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    db.set_watermark_date(job, day).await.unwrap();
    db.mark_run_started(job, at(2024, 3, 6, 0)).await.unwrap();
    assert!(db.reset_watermark_run(job).await.unwrap());

    let mark = db.load_watermark(job).await.unwrap();
    assert_eq!(mark.last_processed_date, Some(day));
    assert_eq!(mark.last_run_at, None);

    db.set_watermark_date("withdraw-stats", day).await.unwrap();
    let names: Vec<String> = db
        .list_watermarks()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.job_name)
        .collect();
    assert_eq!(names, vec!["miner-stats", "withdraw-stats"]);
}

#[tokio::test]
async fn test_ledger_books_balance_changes() {
    let db = setup_test_db().await;
    match &db {
        Database::SQLite(pool) => {
            sqlx::query(
                "INSERT INTO users (user_id, token_balance, created_date) VALUES (5, 100, ?)",
            )
            .bind(at(2024, 1, 1, 0))
            .execute(pool)
            .await
            .expect("failed to insert user");
        }
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    }
    let now = at(2024, 3, 6, 12);
    let entry = LedgerEntry {
        account_id: 5,
        amount: 40.0,
        is_output: false,
        ref_id: 9,
        ref_type: "mining",
        comment: "Mining Payout XMR 10% of shares",
        created_by: 1,
        touch_online: true,
    };

    let id = db
        .execute_transaction(Ledger::UserTokens, &entry, now)
        .await
        .unwrap()
        .expect("entry booked");
    assert_eq!(id.len(), 64);

    // The identical entry at the same instant is refused.
    assert!(db
        .execute_transaction(Ledger::UserTokens, &entry, now)
        .await
        .unwrap()
        .is_none());

    let spend = LedgerEntry {
        amount: 15.0,
        is_output: true,
        ..entry.clone()
    };
    db.execute_transaction(Ledger::UserTokens, &spend, at(2024, 3, 6, 13))
        .await
        .unwrap()
        .expect("entry booked");

    let rows = db.ledger_rows(Ledger::UserTokens, 5).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].balance_before, 100.0);
    assert_eq!(rows[0].balance_after, 140.0);
    assert_eq!(rows[1].balance_after, 125.0);
    assert_eq!(rows[1].is_output, 1);

    let unknown = LedgerEntry {
        account_id: 77,
        ..entry.clone()
    };
    assert!(db
        .execute_transaction(Ledger::UserTokens, &unknown, now)
        .await
        .unwrap()
        .is_none());
    let negative = LedgerEntry {
        amount: -1.0,
        ..entry
    };
    assert!(db
        .execute_transaction(Ledger::UserTokens, &negative, now)
        .await
        .unwrap()
        .is_none());
}
