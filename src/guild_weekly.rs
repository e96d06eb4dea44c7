//! Guild weekly tasks.
//!
//! Week-scoped statistics add to each guild's progress on a weekly key
//! ([`record_progress`]). [`check_weekly_tasks`] compares that progress with
//! the active tasks, claims every task whose target is met (walking
//! multi-level task chains), and pays the reward into the guild bank. A claim
//! row is unique per guild, task and week, and is written before the reward
//! is paid, so a task is never paid twice.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::aggregate::{stat_key, Tally, Window};
use crate::errors::BatchResult;
use crate::store::guilds::WeeklyTask;
use crate::store::{Database, Ledger, LedgerEntry};
use crate::types::{GuildId, Subject};
use crate::week::{week_label, WeekLabel};

/// Ledger reference type of weekly task rewards.
pub const WEEKLY_REF_TYPE: &str = "weekly-task";

/// Key prefix of the monthly count of completed weekly tasks per guild.
pub const COMPLETED_TASKS_PREFIX: &str = "guild-weeklys";

/// Add each guild's sum to its progress on `weekly_key` for `week`.
pub async fn record_progress(
    db: &Database,
    guilds: &Tally<GuildId>,
    week: WeekLabel,
    weekly_key: &str,
    now: NaiveDateTime,
) -> BatchResult<usize> {
    for (guild, amount) in guilds.iter() {
        db.add_weekly_progress(guild, weekly_key, week, amount, now)
            .await?;
    }
    debug!(
        weekly_key,
        week = %week,
        guilds = guilds.len(),
        "Recorded guild weekly progress"
    );
    Ok(guilds.len())
}

/// Outcome of one weekly check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyCheckReport {
    pub week: Option<WeekLabel>,
    pub tasks: usize,
    pub guilds_with_progress: usize,
    pub claims: usize,
}

struct WeeklyState {
    week: WeekLabel,
    progress: BTreeMap<GuildId, HashMap<String, f64>>,
    claimed: HashSet<(GuildId, i64)>,
    completed: Tally<GuildId>,
}

impl WeeklyState {
    fn reached(&self, guild: GuildId, task: &WeeklyTask) -> bool {
        self.progress
            .get(&guild)
            .and_then(|modes| modes.get(&task.target_mode))
            .is_some_and(|progress| *progress >= task.target)
    }
}

/// Claim and pay every weekly task the guilds reached in the week of `now`.
pub async fn check_weekly_tasks(
    db: &Database,
    now: NaiveDateTime,
) -> BatchResult<WeeklyCheckReport> {
    let week = week_label(now.date());
    let tasks = db.active_base_weekly_tasks().await?;

    let mut progress: BTreeMap<GuildId, HashMap<String, f64>> = BTreeMap::new();
    for row in db.weekly_progress(week).await? {
        if let Some(guild) = GuildId::new(row.guild_id) {
            progress
                .entry(guild)
                .or_default()
                .insert(row.weekly_key, row.progress);
        }
    }

    let claimed: HashSet<(GuildId, i64)> = db
        .weekly_claims(week)
        .await?
        .into_iter()
        .filter_map(|claim| Some((GuildId::new(claim.guild_id)?, claim.weekly_id)))
        .collect();

    info!(
        week = %week,
        tasks = tasks.len(),
        guilds = progress.len(),
        claims = claimed.len(),
        "Checking guild weekly tasks"
    );

    let mut state = WeeklyState {
        week,
        progress,
        claimed,
        completed: Tally::new(),
    };
    let guilds: Vec<GuildId> = state.progress.keys().copied().collect();

    for task in &tasks {
        for guild in &guilds {
            if !state.reached(*guild, task) {
                continue;
            }
            claim_once(db, &mut state, *guild, task, now).await?;

            let mut level = task.weekly_id;
            while let Some(next) = db.next_weekly_level(level).await? {
                if !state.reached(*guild, &next) {
                    break;
                }
                claim_once(db, &mut state, *guild, &next, now).await?;
                level = next.weekly_id;
            }
        }
    }

    let key = stat_key(COMPLETED_TASKS_PREFIX, Window::Month, now.date());
    for (guild, count) in state.completed.iter() {
        db.upsert_counter(Subject::Guild(guild), &key, count, now)
            .await?;
    }

    Ok(WeeklyCheckReport {
        week: Some(week),
        tasks: tasks.len(),
        guilds_with_progress: guilds.len(),
        claims: state.completed.total() as usize,
    })
}

async fn claim_once(
    db: &Database,
    state: &mut WeeklyState,
    guild: GuildId,
    task: &WeeklyTask,
    now: NaiveDateTime,
) -> BatchResult<()> {
    if state.claimed.contains(&(guild, task.weekly_id)) {
        return Ok(());
    }
    // Insert first; the unique claim key keeps a second run from paying again.
    if !db.insert_weekly_claim(guild, task, state.week, now).await? {
        state.claimed.insert((guild, task.weekly_id));
        return Ok(());
    }
    state.claimed.insert((guild, task.weekly_id));
    state.completed.bump(guild);

    let comment = format!("Weekly Task {} complete", task.label);
    let entry = LedgerEntry {
        account_id: guild.get(),
        amount: task.reward,
        is_output: false,
        ref_id: task.weekly_id,
        ref_type: WEEKLY_REF_TYPE,
        comment: &comment,
        created_by: 1,
        touch_online: false,
    };

    match db.execute_transaction(Ledger::Guild, &entry, now).await? {
        Some(transaction_id) => {
            db.set_claim_transaction(guild, task.weekly_id, state.week, &transaction_id)
                .await?;
            info!(
                guild = %guild,
                weekly_id = task.weekly_id,
                reward = task.reward,
                "Claimed weekly task"
            );
        }
        None => warn!(
            guild = %guild,
            weekly_id = task.weekly_id,
            "Weekly task claimed but reward could not be paid"
        ),
    }
    Ok(())
}
