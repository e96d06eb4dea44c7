//! Generic roll-up of per-subject tallies into statistics counters.
//!
//! Each statistics job reduces its source rows to a [`Tally`] per metric and
//! hands it to [`roll_up`] together with a [`Rollup`] describing the key
//! prefix, the time windows, and whether the week window also feeds a guild
//! weekly task.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::errors::BatchResult;
use crate::guild_weekly;
use crate::store::Database;
use crate::types::{GuildId, Subject, UserId};
use crate::week::{day_suffix, month_suffix, week_label, week_suffix};

/// Summed quantities per key.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally<K: Ord> {
    sums: BTreeMap<K, f64>,
}

impl<K: Ord> Default for Tally<K> {
    fn default() -> Self {
        Self {
            sums: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy> Tally<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, amount: f64) {
        *self.sums.entry(key).or_insert(0.0) += amount;
    }

    /// Count one occurrence.
    pub fn bump(&mut self, key: K) {
        self.add(key, 1.0);
    }

    pub fn get(&self, key: &K) -> f64 {
        self.sums.get(key).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.sums.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, f64)> + '_ {
        self.sums.iter().map(|(k, v)| (*k, *v))
    }

    /// Re-key the tally, summing entries that map to the same new key and
    /// dropping entries that map to nothing.
    pub fn regroup<J: Ord + Copy>(&self, mut f: impl FnMut(K) -> Option<J>) -> Tally<J> {
        let mut out = Tally::new();
        for (key, amount) in self.iter() {
            if let Some(new_key) = f(key) {
                out.add(new_key, amount);
            }
        }
        out
    }
}

impl<K: Ord + Copy> FromIterator<(K, f64)> for Tally<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for (key, amount) in iter {
            tally.add(key, amount);
        }
        tally
    }
}

/// Build a user tally from raw ids, skipping ids that cannot be users.
/// Returns the tally and the number of skipped rows.
pub fn user_tally(rows: impl IntoIterator<Item = (i64, f64)>) -> (Tally<UserId>, usize) {
    let mut tally = Tally::new();
    let mut skipped = 0;
    for (raw, amount) in rows {
        match UserId::new(raw) {
            Some(user) => tally.add(user, amount),
            None => skipped += 1,
        }
    }
    (tally, skipped)
}

/// Time bucket of a stat key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    AllTime,
    Month,
    Week,
    Day,
}

impl Window {
    pub fn suffix(&self, date: NaiveDate) -> String {
        match self {
            Window::AllTime => "total".to_string(),
            Window::Month => month_suffix(date),
            Window::Week => week_suffix(date),
            Window::Day => day_suffix(date),
        }
    }
}

/// `<prefix>-<window suffix>`, e.g. `user-claims-m-1-2024`.
pub fn stat_key(prefix: &str, window: Window, date: NaiveDate) -> String {
    format!("{prefix}-{}", window.suffix(date))
}

/// Whether a roll-up adds to counters or overwrites them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    Accumulate,
    Replace,
}

pub const TOTAL_MONTH_WEEK: &[Window] = &[Window::AllTime, Window::Month, Window::Week];
pub const TOTAL_MONTH: &[Window] = &[Window::AllTime, Window::Month];
pub const TOTAL: &[Window] = &[Window::AllTime];

/// How one metric is written.
#[derive(Debug, Clone, Copy)]
pub struct Rollup<'a> {
    pub prefix: &'a str,
    pub windows: &'a [Window],
    pub mode: CounterMode,
    /// Guild weekly task fed by the week window.
    pub guild_task: Option<&'a str>,
}

impl<'a> Rollup<'a> {
    pub fn new(prefix: &'a str, windows: &'a [Window]) -> Self {
        Self {
            prefix,
            windows,
            mode: CounterMode::Accumulate,
            guild_task: None,
        }
    }

    pub fn replacing(mut self) -> Self {
        self.mode = CounterMode::Replace;
        self
    }

    pub fn with_guild_task(mut self, task: &'a str) -> Self {
        self.guild_task = Some(task);
        self
    }
}

/// Bucket date and timestamp of one roll-up pass, plus the guild membership
/// map, loaded at most once.
pub struct RollupContext<'a> {
    db: &'a Database,
    date: NaiveDate,
    now: NaiveDateTime,
    membership: Option<HashMap<UserId, GuildId>>,
}

impl<'a> RollupContext<'a> {
    pub fn new(db: &'a Database, date: NaiveDate, now: NaiveDateTime) -> Self {
        Self {
            db,
            date,
            now,
            membership: None,
        }
    }

    async fn membership(&mut self) -> BatchResult<&HashMap<UserId, GuildId>> {
        if self.membership.is_none() {
            self.membership = Some(self.db.load_guild_membership().await?);
        }
        Ok(self.membership.get_or_insert_with(HashMap::new))
    }

    async fn write(
        &self,
        subject: Subject,
        key: &str,
        value: f64,
        mode: CounterMode,
    ) -> BatchResult<f64> {
        match mode {
            CounterMode::Accumulate => self.db.upsert_counter(subject, key, value, self.now).await,
            CounterMode::Replace => self.db.replace_counter(subject, key, value, self.now).await,
        }
    }

    /// Write a per-user tally into every window of `rollup`.
    /// Returns the number of counter writes.
    pub async fn users(&mut self, rollup: Rollup<'_>, tally: &Tally<UserId>) -> BatchResult<usize> {
        let mut writes = 0;
        for window in rollup.windows {
            let key = stat_key(rollup.prefix, *window, self.date);
            for (user, amount) in tally.iter() {
                self.write(Subject::User(user), &key, amount, rollup.mode).await?;
                writes += 1;
            }
            debug!(key = %key, subjects = tally.len(), "Rolled up user counters");

            if *window == Window::Week {
                if let Some(task) = rollup.guild_task {
                    let membership = self.membership().await?;
                    let guilds = tally.regroup(|user| membership.get(&user).copied());
                    guild_weekly::record_progress(
                        self.db,
                        &guilds,
                        week_label(self.date),
                        task,
                        self.now,
                    )
                    .await?;
                }
            }
        }
        Ok(writes)
    }

    /// Write one global counter.
    pub async fn global(&self, key: &str, value: f64) -> BatchResult<f64> {
        self.write(Subject::Global, key, value, CounterMode::Accumulate).await
    }

    /// Overwrite one global counter.
    pub async fn global_snapshot(&self, key: &str, value: f64) -> BatchResult<f64> {
        self.write(Subject::Global, key, value, CounterMode::Replace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: i64) -> UserId {
        UserId::new(n).unwrap()
    }

    #[test]
    fn tally_sums_per_key() {
        let (tally, skipped) = user_tally([(5, 1.0), (5, 1.0), (7, 2.5), (0, 1.0), (-3, 1.0)]);
        assert_eq!(skipped, 2);
        assert_eq!(tally.get(&uid(5)), 2.0);
        assert_eq!(tally.get(&uid(7)), 2.5);
        assert_eq!(tally.len(), 2);
        assert_eq!(tally.total(), 4.5);
    }

    #[test]
    fn regroup_merges_and_drops() {
        let tally: Tally<UserId> = [(uid(1), 2.0), (uid(2), 3.0), (uid(3), 4.0)]
            .into_iter()
            .collect();
        let guild = GuildId::new(9).unwrap();
        let grouped = tally.regroup(|u| (u != uid(3)).then_some(guild));
        assert_eq!(grouped.get(&guild), 5.0);
        assert_eq!(grouped.len(), 1);
    }

    #[test]
    fn keys_per_window() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert_eq!(stat_key("user-claims", Window::AllTime, date), "user-claims-total");
        assert_eq!(stat_key("user-claims", Window::Month, date), "user-claims-m-3-2024");
        assert_eq!(stat_key("user-claims", Window::Week, date), "user-claims-w-10-2024");
        assert_eq!(stat_key("users-created", Window::Day, date), "users-created-d-2024-03-06");
    }
}
