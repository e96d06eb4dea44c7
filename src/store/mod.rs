//! Persistence layer.
//!
//! [`Database`] wraps one connection pool per compiled backend. Queries are
//! written once with `?` placeholders; [`with_pool!`] runs the same body against
//! whichever pool is active and renumbers the placeholders for PostgreSQL.

#[cfg(feature = "sqlite")]
use std::str::FromStr;
use tracing::{error, info};

#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

#[cfg(feature = "postgres")]
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::errors::{BatchError, BatchResult};

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("enable at least one database backend: `sqlite` or `postgres`");

/// Run `$body` with `$pool` bound to the active pool and `$stmt` bound to the
/// SQL text in that backend's placeholder syntax.
macro_rules! with_pool {
    ($db:expr, $sql:expr, |$pool:ident, $stmt:ident| $body:expr) => {
        match $db {
            #[cfg(feature = "sqlite")]
            $crate::store::Database::SQLite($pool) => {
                let $stmt: &str = $sql;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::store::Database::Postgres($pool) => {
                let numbered = $crate::store::numbered_placeholders($sql);
                let $stmt: &str = numbered.as_str();
                $body
            }
        }
    };
}

pub(crate) use with_pool;

pub mod activity;
pub mod counters;
pub mod finance;
pub mod guilds;
pub mod ledger;
pub mod users;
pub mod watermark;

pub use counters::StatCounter;
pub use ledger::{Ledger, LedgerEntry};
pub use watermark::{RunPeriod, RunWatermark};

/// Unified database abstraction over SQLite and Postgres.
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Open a pool for the configured backend.
    pub async fn connect(config: &DatabaseConfig) -> BatchResult<Self> {
        match config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let url = config.sqlite_url.as_str();
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| BatchError::ConfigError(format!("invalid SQLite URL: {e}")))?
                    .create_if_missing(true);

                // Every connection to `:memory:` opens its own database, so the
                // pool must hold on to exactly one.
                let pool_options = if url.contains(":memory:") {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new().max_connections(config.max_connections)
                };

                let pool = pool_options.connect_with(options).await.map_err(|e| {
                    error!("Failed to connect to SQLite: {e}");
                    BatchError::DatabaseError(format!("failed to connect to SQLite: {e}"))
                })?;

                Ok(Database::SQLite(pool))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(BatchError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        BatchError::DatabaseError(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Database::Postgres(pool))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(BatchError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(BatchError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Name of the active backend.
    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Create every table the jobs read or write. Idempotent.
    pub async fn migrate(&self) -> BatchResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                sqlx::raw_sql(include_str!("../../migrations/sqlite/001_batch_schema.sql"))
                    .execute(pool)
                    .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::raw_sql(include_str!("../../migrations/postgres/001_batch_schema.sql"))
                    .execute(pool)
                    .await?;
            }
        }
        info!(backend = self.backend(), "Schema is up to date");
        Ok(())
    }
}

/// Rewrite `?` placeholders as `$1`, `$2`, ... for PostgreSQL.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}
