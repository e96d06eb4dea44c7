//! Integration tests for guild weekly tasks and the guild jobs.

#![cfg(feature = "sqlite")]

use chrono::{NaiveDate, NaiveDateTime};
use faucet_batch::config::DatabaseConfig;
use faucet_batch::guild_weekly::check_weekly_tasks;
use faucet_batch::jobs::{run_cache_guild_members, run_guild_weekly_check, JobOutcome, SkipReason};
use faucet_batch::store::{Database, Ledger};
use faucet_batch::types::{GuildId, Subject};
use faucet_batch::week::week_label;

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

/// Guild 3 and a three-level "dailytask" chain: 50 → 100 → 500.
async fn setup_guild_tasks(db: &Database) {
    exec(db, "INSERT INTO guild (guild_id, label, token_balance) VALUES (3, 'Miners', 0)").await;
    exec(db, "INSERT INTO guild (guild_id, label, token_balance) VALUES (4, 'Idlers', 0)").await;
    exec(
        db,
        "INSERT INTO guild_weekly_task (weekly_id, label, target_mode, target, reward, series) VALUES \
         (1, 'Daily Tasks I', 'dailytask', 50, 100, 0), \
         (2, 'Daily Tasks II', 'dailytask', 100, 200, 1), \
         (3, 'Daily Tasks III', 'dailytask', 500, 400, 2), \
         (4, 'Shortlinks I', 'shortlink', 10, 50, 0)",
    )
    .await;
}

#[tokio::test]
async fn test_weekly_chain_is_claimed_and_paid_once() {
    let db = setup_test_db().await;
    setup_guild_tasks(&db).await;
    let now = at(2024, 3, 6, 12);
    let week = week_label(now.date());
    let guild = GuildId::new(3).unwrap();

    db.add_weekly_progress(guild, "dailytask", week, 120.0, now)
        .await
        .unwrap();
    db.add_weekly_progress(GuildId::new(4).unwrap(), "shortlink", week, 3.0, now)
        .await
        .unwrap();

    let report = check_weekly_tasks(&db, now).await.expect("weekly check failed");
    assert_eq!(report.week, Some(week));
    assert_eq!(report.tasks, 2);
    assert_eq!(report.guilds_with_progress, 2);
    assert_eq!(report.claims, 2);

    let claims = db.weekly_claims(week).await.unwrap();
    let claimed: Vec<i64> = claims.iter().map(|c| c.weekly_id).collect();
    assert_eq!(claimed, vec![1, 2]);
    assert!(claims.iter().all(|c| c.guild_id == 3 && c.transaction_id.is_some()));

    let rows = db.ledger_rows(Ledger::Guild, 3).await.unwrap();
    assert_eq!(rows.len(), 2);
    let balance = rows.iter().map(|r| r.balance_after).fold(0.0, f64::max);
    assert_eq!(balance, 300.0);
    assert_eq!(
        db.counter_value(Subject::Guild(guild), "guild-weeklys-m-3-2024")
            .await
            .unwrap(),
        2.0
    );

    // A second check in the same week pays nothing.
    let report = check_weekly_tasks(&db, at(2024, 3, 6, 13))
        .await
        .expect("weekly check failed");
    assert_eq!(report.claims, 0);
    assert_eq!(db.ledger_rows(Ledger::Guild, 3).await.unwrap().len(), 2);
    assert_eq!(db.weekly_claims(week).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_chain_continues_after_base_level_was_claimed() {
    let db = setup_test_db().await;
    setup_guild_tasks(&db).await;
    let now = at(2024, 3, 6, 12);
    let week = week_label(now.date());
    let guild = GuildId::new(3).unwrap();

    db.add_weekly_progress(guild, "dailytask", week, 60.0, now)
        .await
        .unwrap();
    let report = check_weekly_tasks(&db, now).await.unwrap();
    assert_eq!(report.claims, 1);

    db.add_weekly_progress(guild, "dailytask", week, 50.0, now)
        .await
        .unwrap();
    let report = check_weekly_tasks(&db, at(2024, 3, 7, 12)).await.unwrap();
    assert_eq!(report.claims, 1);

    let claimed: Vec<i64> = db
        .weekly_claims(week)
        .await
        .unwrap()
        .iter()
        .map(|c| c.weekly_id)
        .collect();
    assert_eq!(claimed, vec![1, 2]);
}

#[tokio::test]
async fn test_guild_weekly_job_reports_claims() {
    let db = setup_test_db().await;
    setup_guild_tasks(&db).await;
    let now = at(2024, 3, 6, 12);

    db.add_weekly_progress(GuildId::new(4).unwrap(), "shortlink", week_label(now.date()), 12.0, now)
        .await
        .unwrap();

    let outcome = run_guild_weekly_check(&db, "guild-weekly-check", now)
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(1));

    let mark = db.load_watermark("guild-weekly-check").await.unwrap();
    assert_eq!(mark.last_run_at, Some(now));
}

#[tokio::test]
async fn test_cache_guild_members_once_per_day() {
    let db = setup_test_db().await;
    setup_guild_tasks(&db).await;
    exec(
        &db,
        "INSERT INTO guild_member (user_id, guild_id, date_joined) VALUES \
         (5, 3, '2024-01-01 00:00:00'), (6, 3, '2024-01-02 00:00:00'), (7, 4, NULL)",
    )
    .await;

    let now = at(2024, 3, 6, 0);
    let outcome = run_cache_guild_members(&db, "cache-guild-members", now)
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::completed(1));

    let members = match &db {
        Database::SQLite(pool) => {
            sqlx::query_scalar::<_, i64>("SELECT members FROM guild WHERE guild_id = 3")
                .fetch_one(pool)
                .await
                .expect("failed to read guild")
        }
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    };
    assert_eq!(members, 2);

    let outcome = run_cache_guild_members(&db, "cache-guild-members", at(2024, 3, 6, 8))
        .await
        .expect("job failed");
    assert_eq!(outcome, JobOutcome::Skipped(SkipReason::AlreadyRan));
}
