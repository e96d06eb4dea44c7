//! Proportional payout of pool earnings to the miners behind each worker.

use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::pool_api::{PoolApi, WorkerHashrate, WorkerShares};
use crate::config::MiningConfig;
use crate::errors::{BatchError, BatchResult};
use crate::store::finance::NewMinerPayment;
use crate::store::Database;
use crate::types::{Coin, UserId};

/// Shortest worker name that can carry a user id.
const MIN_WORKER_NAME_LEN: usize = 5;
const MAX_RIG_NAME_LEN: usize = 50;
const DEFAULT_RIG_NAME: &str = "default";

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// A worker active during the averaging window.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStat {
    pub name: String,
    pub hashrate: f64,
    pub pool_percent: f64,
    pub shares: f64,
    pub shares_percent: f64,
}

/// Keep named, active workers and compute their share of the pool hashrate.
pub fn active_workers(
    average_hashrate: f64,
    listing: &[WorkerHashrate],
) -> BTreeMap<String, WorkerStat> {
    let mut workers = BTreeMap::new();
    let mut total_percent = 0.0;
    for entry in listing {
        let Some(name) = entry.worker.as_deref() else {
            continue;
        };
        if name.len() < MIN_WORKER_NAME_LEN {
            continue;
        }
        if entry.hashrate <= 0.0 {
            debug!(worker = name, "Skipping inactive worker");
            continue;
        }
        let pool_percent = if average_hashrate > 0.0 {
            round_to(100.0 / (average_hashrate / entry.hashrate), 2)
        } else {
            0.0
        };
        total_percent += pool_percent;
        workers.insert(
            name.to_string(),
            WorkerStat {
                name: name.to_string(),
                hashrate: entry.hashrate,
                pool_percent,
                shares: 0.0,
                shares_percent: 0.0,
            },
        );
    }
    if total_percent > 100.0 {
        warn!(total_percent, "Worker hashrates exceed the pool average");
    }
    workers
}

/// Attach shares to the active workers and return those with a positive
/// share of the total.
pub fn workers_with_shares(
    mut workers: BTreeMap<String, WorkerStat>,
    listing: &[WorkerShares],
) -> Vec<WorkerStat> {
    let mut total_shares = 0.0;
    for entry in listing {
        let Some(name) = entry.worker.as_deref() else {
            continue;
        };
        if let Some(worker) = workers.get_mut(name) {
            worker.shares = entry.shares;
            total_shares += entry.shares;
        }
    }

    let mut out = Vec::new();
    for mut worker in workers.into_values() {
        if worker.shares > 0.0 && total_shares > 0.0 {
            worker.shares_percent = round_to(100.0 / (total_shares / worker.shares), 2);
            out.push(worker);
        } else {
            debug!(worker = %worker.name, "Skipping worker without shares");
        }
    }
    out
}

/// New earnings since the cached balance. A balance below the cache means
/// the pool paid out in between, so the whole balance counts.
pub fn earnings_since(balance: f64, cached: Option<f64>) -> f64 {
    let cached = cached.unwrap_or(0.0);
    let earnings = if balance > cached && cached > 0.0 {
        balance - cached
    } else {
        balance
    };
    round_to(earnings, 8)
}

/// User behind a worker name `<prefix><userId>[-<rig>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOwner {
    pub user_id: UserId,
    pub rig: String,
    /// Worker used the hack prefix instead of the regular one.
    pub hacker: bool,
}

fn rig_sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>|[^A-Za-z0-9_.]").unwrap())
}

pub fn parse_worker_name(name: &str, prefix: &str, hack_prefix: &str) -> Option<WorkerOwner> {
    let mut parts = name.splitn(2, '-');
    let head = parts.next()?;
    let (raw_id, hacker) = if let Some(rest) = head.strip_prefix(hack_prefix) {
        (rest, true)
    } else {
        (head.strip_prefix(prefix)?, false)
    };
    let user_id = UserId::new(raw_id.parse().ok()?)?;

    let rig = parts
        .next()
        .map(|rig| {
            let clean = rig_sanitizer().replace_all(rig, "");
            clean.chars().take(MAX_RIG_NAME_LEN).collect::<String>()
        })
        .filter(|rig| !rig.is_empty())
        .unwrap_or_else(|| DEFAULT_RIG_NAME.to_string());

    Some(WorkerOwner {
        user_id,
        rig,
        hacker,
    })
}

/// Payments computed for one run, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutQueue {
    pub budget: f64,
    pub payments: Vec<NewMinerPayment>,
}

impl PayoutQueue {
    pub fn total(&self) -> f64 {
        self.payments.iter().map(|p| p.amount_coin).sum()
    }

    /// The queue may exceed its budget by at most `slack` (rounding spare).
    pub fn validate(&self, slack: f64) -> Result<(), BudgetExceeded> {
        let total = self.total();
        let limit = self.budget + slack;
        if total <= limit {
            Ok(())
        } else {
            Err(BudgetExceeded { total, limit })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetExceeded {
    pub total: f64,
    pub limit: f64,
}

/// Split `budget` between owned workers by their share percentage.
pub fn plan_payouts(coin: Coin, budget: f64, workers: &[(WorkerOwner, WorkerStat)]) -> PayoutQueue {
    let payments = workers
        .iter()
        .filter(|(_, stat)| stat.shares_percent > 0.0)
        .map(|(owner, stat)| NewMinerPayment {
            user_id: owner.user_id.get(),
            coin,
            worker: owner.rig.clone(),
            hashrate: stat.hashrate,
            hashrate_percent: stat.pool_percent,
            shares: stat.shares,
            shares_percent: stat.shares_percent,
            amount_coin: (budget * (stat.shares_percent / 100.0)).floor(),
        })
        .collect();
    PayoutQueue { budget, payments }
}

/// How a payout run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutOutcome {
    /// No usable wallet configured for the coin.
    NoWallet,
    /// The pool balance did not grow.
    NothingToPay,
    /// Payments stored as open for the payment-sending job.
    Queued { payments: usize, total: f64, budget: f64 },
    /// The queue overshot its budget and was discarded.
    BudgetExceeded(BudgetExceeded),
}

/// Pulls pool statistics for one coin and queues the miners' payments.
pub struct MinerPayoutEngine<'a> {
    db: &'a Database,
    pool: &'a dyn PoolApi,
    config: &'a MiningConfig,
}

impl<'a> MinerPayoutEngine<'a> {
    pub fn new(db: &'a Database, pool: &'a dyn PoolApi, config: &'a MiningConfig) -> Self {
        Self { db, pool, config }
    }

    pub async fn run(&self, coin: Coin, now: NaiveDateTime) -> BatchResult<PayoutOutcome> {
        let wallet = match self.config.wallet(coin.as_str()) {
            Some(wallet) if wallet.len() >= 10 => wallet,
            other => {
                warn!(coin = %coin, wallet = other.unwrap_or(""), "No valid wallet address found");
                return Ok(PayoutOutcome::NoWallet);
            }
        };
        let hours = self.config.hashrate_hours;

        let average = self.pool.average_hashrate(coin, wallet, hours).await?;
        if average <= 0.0 {
            return Err(BatchError::UpstreamMissing(
                "total average hashrate is zero".to_string(),
            ));
        }
        info!(coin = %coin, hours, average, "Loaded total average hashrate");

        let hashrates = self.pool.worker_hashrates(coin, wallet, hours).await?;
        let workers = active_workers(average, &hashrates);
        info!(active_workers = workers.len(), "Loaded worker hashrates");

        let shares = self.pool.worker_shares(coin, wallet, hours).await?;
        let workers = workers_with_shares(workers, &shares);
        info!(workers_with_shares = workers.len(), "Loaded worker shares");

        let balance = self.pool.balance(coin, wallet).await?;
        let cached = self.db.cached_pool_balance(coin).await?;
        self.db.set_cached_pool_balance(coin, balance, now).await?;
        let earnings = earnings_since(balance, cached);
        if earnings <= 0.0 {
            warn!(coin = %coin, balance, "No earnings in crypto, nothing to pay");
            return Ok(PayoutOutcome::NothingToPay);
        }

        let dollar_value = self.db.coin_dollar_value(coin).await?.ok_or_else(|| {
            BatchError::ConfigError(format!("no dollar value stored for {}", coin.sign()))
        })?;
        let coins = (earnings * dollar_value * self.config.coins_per_dollar).round();
        let budget = coins * self.config.earnings_margin;
        info!(
            earnings,
            coins,
            budget,
            margin = self.config.earnings_margin,
            "Computed payout budget"
        );

        let mut owned = Vec::with_capacity(workers.len());
        for stat in workers {
            let Some(owner) =
                parse_worker_name(&stat.name, &self.config.worker_prefix, &self.config.hack_prefix)
            else {
                debug!(worker = %stat.name, "Invalid worker name");
                continue;
            };
            if owner.hacker {
                self.db
                    .complete_achievement(owner.user_id.get(), &self.config.hack_achievement, now)
                    .await?;
            }
            if !self.db.user_exists(owner.user_id.get()).await? {
                debug!(user_id = %owner.user_id, "Worker owner not found");
                continue;
            }
            owned.push((owner, stat));
        }

        let queue = plan_payouts(coin, budget, &owned);
        if let Err(exceeded) = queue.validate(self.config.payout_slack) {
            warn!(
                total = exceeded.total,
                limit = exceeded.limit,
                "Invalid payment queue total, discarding queue"
            );
            return Ok(PayoutOutcome::BudgetExceeded(exceeded));
        }

        for payment in &queue.payments {
            debug!(user_id = payment.user_id, amount = payment.amount_coin, "Queue payment");
            self.db.insert_miner_payment(payment, now).await?;
        }

        Ok(PayoutOutcome::Queued {
            payments: queue.payments.len(),
            total: queue.total(),
            budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, shares_percent: f64) -> WorkerStat {
        WorkerStat {
            name: name.to_string(),
            hashrate: 100.0,
            pool_percent: shares_percent,
            shares: shares_percent,
            shares_percent,
        }
    }

    fn owner(id: i64) -> WorkerOwner {
        WorkerOwner {
            user_id: UserId::new(id).unwrap(),
            rig: DEFAULT_RIG_NAME.to_string(),
            hacker: false,
        }
    }

    #[test]
    fn budget_is_split_by_share_percentage() {
        let workers = vec![(owner(1), stat("a", 60.0)), (owner(2), stat("b", 40.0))];
        let queue = plan_payouts(Coin::Xmr, 10_000.0, &workers);
        let amounts: Vec<f64> = queue.payments.iter().map(|p| p.amount_coin).collect();
        assert_eq!(amounts, vec![6000.0, 4000.0]);
        assert!(queue.validate(100.0).is_ok());
    }

    #[test]
    fn phantom_worker_overshoots_budget() {
        let workers = vec![
            (owner(1), stat("a", 60.0)),
            (owner(2), stat("b", 40.0)),
            (owner(3), stat("c", 5.0)),
        ];
        let queue = plan_payouts(Coin::Xmr, 10_000.0, &workers);
        assert_eq!(queue.total(), 10_500.0);
        assert_eq!(
            queue.validate(100.0),
            Err(BudgetExceeded {
                total: 10_500.0,
                limit: 10_100.0
            })
        );
    }

    #[test]
    fn amounts_are_floored() {
        let workers = vec![(owner(1), stat("a", 33.33))];
        let queue = plan_payouts(Coin::Etc, 1000.0, &workers);
        assert_eq!(queue.payments[0].amount_coin, 333.0);
    }

    #[test]
    fn worker_names() {
        let parsed =
            parse_worker_name("swissfaucetio42-rig<b>1</b>", "swissfaucetio", "hacker").unwrap();
        assert_eq!(parsed.user_id.get(), 42);
        assert_eq!(parsed.rig, "rig1");
        assert!(!parsed.hacker);

        let parsed = parse_worker_name("hacker7", "swissfaucetio", "hacker").unwrap();
        assert_eq!(parsed.user_id.get(), 7);
        assert_eq!(parsed.rig, "default");
        assert!(parsed.hacker);

        assert!(parse_worker_name("swissfaucetio0-x", "swissfaucetio", "hacker").is_none());
        assert!(parse_worker_name("someoneelse12", "swissfaucetio", "hacker").is_none());
        assert!(parse_worker_name("swissfaucetioabc", "swissfaucetio", "hacker").is_none());
    }

    #[test]
    fn worker_percentages() {
        let listing = vec![
            WorkerHashrate { worker: Some("swissfaucetio1".into()), hashrate: 300.0 },
            WorkerHashrate { worker: Some("swissfaucetio2".into()), hashrate: 100.0 },
            WorkerHashrate { worker: Some("abc".into()), hashrate: 50.0 },
            WorkerHashrate { worker: Some("swissfaucetio3".into()), hashrate: 0.0 },
        ];
        let workers = active_workers(400.0, &listing);
        assert_eq!(workers.len(), 2);
        assert_eq!(workers["swissfaucetio1"].pool_percent, 75.0);

        let shares = vec![
            WorkerShares { worker: Some("swissfaucetio1".into()), shares: 30.0 },
            WorkerShares { worker: Some("swissfaucetio2".into()), shares: 60.0 },
            WorkerShares { worker: Some("unknown-worker".into()), shares: 500.0 },
        ];
        let with_shares = workers_with_shares(workers, &shares);
        let percents: Vec<f64> = with_shares.iter().map(|w| w.shares_percent).collect();
        assert_eq!(percents, vec![33.33, 66.67]);
    }

    #[test]
    fn earnings_against_cache() {
        assert_eq!(earnings_since(1.5, Some(1.0)), 0.5);
        assert_eq!(earnings_since(0.2, Some(1.0)), 0.2);
        assert_eq!(earnings_since(0.3, None), 0.3);
    }
}
