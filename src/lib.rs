//! faucet-batch - scheduled batch jobs of a faucet rewards platform
//!
//! Each job reads the rows added since its last run, aggregates them into
//! per-user, per-guild and global statistics counters, and records a
//! watermark that keeps it to one run per day (or per interval). Further
//! jobs pay out mining pool earnings, claim guild weekly tasks and flag
//! suspicious accounts.
//!
//! # Features
//!
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.
//! - `scheduler` - `batch:daemon`, an in-process cron runner.
//!
//! # Example
//!
//! ```toml
//! # SQLite only
//! faucet-batch = { path = "." }
//!
//! # PostgreSQL with the daemon
//! faucet-batch = { path = ".", features = ["postgres", "scheduler"] }
//! ```

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod errors;
pub mod guild_weekly;
pub mod invoice;
pub mod jobs;
pub mod logging;
pub mod mining;
pub mod store;
pub mod types;
pub mod week;

pub use config::BatchConfig;
pub use errors::{BatchError, BatchResult};
pub use jobs::{BatchJob, JobContext, JobError, JobOutcome};
pub use store::Database;
