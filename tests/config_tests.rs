use std::env;
use std::path::PathBuf;

use faucet_batch::config::BatchConfig;
use faucet_batch::errors::BatchError;
use serial_test::serial;
use tokio_test::{assert_err, assert_ok};

const VARS: &[&str] = &[
    "FAUCET_DATABASE_TYPE",
    "FAUCET_DATABASE_URL",
    "FAUCET_LOG_LEVEL",
    "FAUCET_HTTP_TIMEOUT_SECS",
    "FAUCET_POOL_API_URL",
    "FAUCET_INVOICE_MERCHANT_KEY",
    "FAUCET_INVOICE_SECRET_KEY",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("faucet-batch-{}-{name}.toml", std::process::id()));
    std::fs::write(&path, contents).expect("failed to write config file");
    path
}

#[test]
#[serial]
fn defaults_load_without_a_file() {
    clear_env();

    let config = assert_ok!(BatchConfig::load());
    assert_eq!(config.database.db_type, "sqlite");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.invoices.check_interval_minutes, 30);
    assert!(config.schedule.is_empty());
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env();
    let path = write_config(
        "env",
        r#"
        [database]
        db_type = "sqlite"
        sqlite_url = "sqlite://from-file.db"

        [logging]
        level = "debug"
        "#,
    );

    env::set_var("FAUCET_DATABASE_URL", "sqlite://from-env.db");
    env::set_var("FAUCET_LOG_LEVEL", "warn");
    env::set_var("FAUCET_HTTP_TIMEOUT_SECS", "5");
    env::set_var("FAUCET_INVOICE_MERCHANT_KEY", "merchant");

    let config = BatchConfig::load_from(Some(&path)).expect("config should load");
    assert_eq!(config.database.sqlite_url, "sqlite://from-env.db");
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.http.timeout_secs, 5);
    assert_eq!(config.invoices.merchant_key, "merchant");

    clear_env();
    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn postgres_url_goes_to_the_postgres_slot() {
    clear_env();
    env::set_var("FAUCET_DATABASE_TYPE", "postgres");
    env::set_var("FAUCET_DATABASE_URL", "postgres://batch@db/faucet");

    let config = BatchConfig::load().expect("config should load");
    assert_eq!(config.database.db_type, "postgres");
    assert_eq!(config.database.url(), "postgres://batch@db/faucet");
    assert_eq!(config.database.sqlite_url, "sqlite://faucet.db");

    clear_env();
}

#[test]
#[serial]
fn file_sections_are_read() {
    clear_env();
    let path = write_config(
        "sections",
        r#"
        [mining]
        earnings_margin = 0.5
        payout_slack = 10.0

        [mining.wallets]
        xmr = "48abcdefghijklmnop"

        [jobs]
        referral_bonus_rate = 0.2

        [schedule]
        faucet-claim-stats = "0 15 0 * * *"
        miner-shares-rvn = "off"
        "#,
    );

    let config = BatchConfig::load_from(Some(&path)).expect("config should load");
    assert_eq!(config.mining.earnings_margin, 0.5);
    assert_eq!(config.mining.wallet("xmr"), Some("48abcdefghijklmnop"));
    assert_eq!(config.jobs.referral_bonus_rate, 0.2);
    assert_eq!(config.jobs.online_timeout_secs, 3600);
    assert_eq!(
        config.schedule.get("faucet-claim-stats").map(String::as_str),
        Some("0 15 0 * * *")
    );
    assert_eq!(config.schedule.get("miner-shares-rvn").map(String::as_str), Some("off"));

    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    clear_env();
    env::set_var("FAUCET_LOG_LEVEL", "loud");
    assert!(matches!(BatchConfig::load(), Err(BatchError::ConfigError(_))));
    clear_env();

    let path = write_config(
        "invalid",
        r#"
        [invoices]
        check_interval_minutes = 0
        "#,
    );
    assert!(matches!(
        BatchConfig::load_from(Some(&path)),
        Err(BatchError::ConfigError(_))
    ));
    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    clear_env();
    let path = env::temp_dir().join("faucet-batch-does-not-exist.toml");
    assert_err!(BatchConfig::load_from(Some(&path)));
}
