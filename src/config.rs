//! Configuration system for the batch runner.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file (or the path given with `--config`)
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `FAUCET_DATABASE_TYPE` - Database backend (`sqlite` or `postgres`)
//! - `FAUCET_DATABASE_URL` - Database connection URL
//! - `FAUCET_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `FAUCET_HTTP_TIMEOUT_SECS` - Timeout applied to every outbound HTTP call
//! - `FAUCET_POOL_API_URL` - Mining pool API base URL
//! - `FAUCET_INVOICE_MERCHANT_KEY` - Invoice API merchant key
//! - `FAUCET_INVOICE_SECRET_KEY` - Invoice API secret key
//!
//! The loaded [`BatchConfig`] is handed to every job explicitly; jobs never
//! look settings up on their own.

use config::Config;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;

use crate::errors::{BatchError, BatchResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub mining: MiningConfig,
    pub invoices: InvoiceConfig,
    pub jobs: JobsConfig,
    /// Cron expression per watermark name, used by `batch:daemon`.
    pub schedule: BTreeMap<String, String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
    /// Upper bound for pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://faucet.db".to_string(),
            postgres_url: "postgres://localhost/faucet".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// URL of the configured backend.
    pub fn url(&self) -> &str {
        if self.db_type == "postgres" {
            &self.postgres_url
        } else {
            &self.sqlite_url
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: false,
        }
    }
}

/// Outbound HTTP settings shared by the pool and invoice clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Mining pool payout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Pool API base URL, without trailing slash
    pub api_base_url: String,
    /// Averaging window passed to the hashrate and share endpoints
    pub hashrate_hours: u32,
    /// Worker name prefix that precedes the user id
    pub worker_prefix: String,
    /// Alternative prefix that also completes the hack achievement
    pub hack_prefix: String,
    /// Achievement completed by workers using `hack_prefix`
    pub hack_achievement: String,
    /// Share of pool earnings paid out to miners
    pub earnings_margin: f64,
    /// Platform coins credited per US dollar
    pub coins_per_dollar: f64,
    /// Tolerated rounding surplus of a payout queue over its budget
    pub payout_slack: f64,
    /// Pool wallet address per coin (`xmr`, `etc`, `rvn`)
    pub wallets: HashMap<String, String>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.nanopool.org/v1".to_string(),
            hashrate_hours: 1,
            worker_prefix: "swissfaucetio".to_string(),
            hack_prefix: "hacker".to_string(),
            hack_achievement: "mininghack".to_string(),
            earnings_margin: 0.8,
            coins_per_dollar: 10_000.0,
            payout_slack: 100.0,
            wallets: HashMap::new(),
        }
    }
}

impl MiningConfig {
    /// Wallet configured for a coin, if any.
    pub fn wallet(&self, coin: &str) -> Option<&str> {
        self.wallets.get(coin).map(String::as_str)
    }
}

/// Invoice API configuration for PTC deposits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvoiceConfig {
    pub api_url: String,
    pub merchant_key: String,
    pub secret_key: String,
    /// Only deposits younger than this are checked
    pub lookback_hours: i64,
    /// Minimum spacing between two checks
    pub check_interval_minutes: i64,
    /// API credits charged per lookup
    pub credits_per_call: f64,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://cryptounifier.io/api/v1/merchant/invoice-info".to_string(),
            merchant_key: String::new(),
            secret_key: String::new(),
            lookback_hours: 3,
            check_interval_minutes: 30,
            credits_per_call: 0.1,
        }
    }
}

/// Tunables of the maintenance and statistics jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Seconds of inactivity after which a user is shown offline
    pub online_timeout_secs: i64,
    /// Minutes after which a matched but abandoned game is released
    pub game_unlock_minutes: i64,
    /// Days of faucet claims inspected by the multi-account check
    pub fraud_claim_lookback_days: i64,
    /// Share of a referred user's withdrawal credited to the referrer
    pub referral_bonus_rate: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            online_timeout_secs: 3600,
            game_unlock_minutes: 10,
            fraud_claim_lookback_days: 7,
            referral_bonus_rate: 0.1,
        }
    }
}

impl BatchConfig {
    /// Load configuration from `config.toml` (if present) and the environment.
    pub fn load() -> BatchResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit file (required) or the default
    /// optional `config.toml`, then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> BatchResult<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let builder = Config::builder()
            .set_default("database.db_type", "sqlite")
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .add_source(file)
            .set_override_option("database.db_type", env::var("FAUCET_DATABASE_TYPE").ok())
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.sqlite_url",
                env::var("FAUCET_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.postgres_url",
                env::var("FAUCET_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("FAUCET_LOG_LEVEL").ok())
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option(
                "http.timeout_secs",
                env::var("FAUCET_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option("mining.api_base_url", env::var("FAUCET_POOL_API_URL").ok())
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option(
                "invoices.merchant_key",
                env::var("FAUCET_INVOICE_MERCHANT_KEY").ok(),
            )
            .map_err(|e| BatchError::ConfigError(e.to_string()))?
            .set_override_option(
                "invoices.secret_key",
                env::var("FAUCET_INVOICE_SECRET_KEY").ok(),
            )
            .map_err(|e| BatchError::ConfigError(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| BatchError::ConfigError(format!("failed to build config: {e}")))?;

        let config: BatchConfig = settings
            .try_deserialize()
            .map_err(|e| BatchError::ConfigError(format!("failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> BatchResult<()> {
        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(BatchError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.database.max_connections == 0 {
            return Err(BatchError::ConfigError(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(BatchError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.http.timeout_secs == 0 {
            return Err(BatchError::ConfigError(
                "http.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.mining.earnings_margin <= 0.0 {
            return Err(BatchError::ConfigError(
                "mining.earnings_margin must be positive".to_string(),
            ));
        }
        if self.mining.coins_per_dollar <= 0.0 {
            return Err(BatchError::ConfigError(
                "mining.coins_per_dollar must be positive".to_string(),
            ));
        }
        if self.mining.payout_slack < 0.0 {
            return Err(BatchError::ConfigError(
                "mining.payout_slack cannot be negative".to_string(),
            ));
        }
        if self.mining.hashrate_hours == 0 {
            return Err(BatchError::ConfigError(
                "mining.hashrate_hours must be greater than 0".to_string(),
            ));
        }

        if self.jobs.referral_bonus_rate < 0.0 {
            return Err(BatchError::ConfigError(
                "jobs.referral_bonus_rate cannot be negative".to_string(),
            ));
        }
        if self.invoices.check_interval_minutes <= 0 || self.invoices.lookback_hours <= 0 {
            return Err(BatchError::ConfigError(
                "invoices.check_interval_minutes and invoices.lookback_hours must be positive"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.url(), "sqlite://faucet.db");
        assert_eq!(config.mining.payout_slack, 100.0);
        assert_eq!(config.jobs.online_timeout_secs, 3600);
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut config = BatchConfig::default();
        config.database.db_type = "mysql".to_string();
        assert!(matches!(
            config.validate(),
            Err(BatchError::ConfigError(msg)) if msg.contains("mysql")
        ));
    }

    #[test]
    fn rejects_non_positive_margin() {
        let mut config = BatchConfig::default();
        config.mining.earnings_margin = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn wallet_lookup_by_coin() {
        let mut config = BatchConfig::default();
        config
            .mining
            .wallets
            .insert("xmr".to_string(), "48abcdefghijkl".to_string());
        assert_eq!(config.mining.wallet("xmr"), Some("48abcdefghijkl"));
        assert_eq!(config.mining.wallet("rvn"), None);
    }
}
