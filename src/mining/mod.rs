//! Mining pool integration: pool statistics and miner payouts.

pub mod payout;
pub mod pool_api;

pub use payout::{MinerPayoutEngine, PayoutOutcome, PayoutQueue};
pub use pool_api::{NanopoolClient, PoolApi, WorkerHashrate, WorkerShares};
