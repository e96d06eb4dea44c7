//! Guild membership, member counts and weekly task state.

use chrono::NaiveDateTime;
use sqlx::FromRow;
use std::collections::HashMap;

use super::{with_pool, Database};
use crate::errors::BatchResult;
use crate::types::{GuildId, UserId};
use crate::week::WeekLabel;

#[derive(Debug, Clone, FromRow)]
struct MembershipRow {
    user_id: i64,
    guild_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct GuildMemberCount {
    pub guild_id: i64,
    pub members: i64,
}

/// A weekly guild task. `series` is 0 for a base task, otherwise the id of
/// the level it follows.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct WeeklyTask {
    pub weekly_id: i64,
    pub label: String,
    pub target_mode: String,
    pub target: f64,
    pub reward: f64,
    pub series: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct WeeklyProgress {
    pub guild_id: i64,
    pub weekly_key: String,
    pub progress: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct WeeklyClaim {
    pub guild_id: i64,
    pub weekly_id: i64,
    pub week: i64,
    pub year: i64,
    pub reward: f64,
    pub transaction_id: Option<String>,
    pub date_claimed: NaiveDateTime,
}

impl Database {
    /// Guild of every user that has actually joined one.
    pub async fn load_guild_membership(&self) -> BatchResult<HashMap<UserId, GuildId>> {
        let rows = with_pool!(
            self,
            "SELECT user_id, guild_id FROM guild_member WHERE date_joined IS NOT NULL",
            |pool, sql| {
                sqlx::query_as::<_, MembershipRow>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| Some((UserId::new(row.user_id)?, GuildId::new(row.guild_id)?)))
            .collect())
    }

    pub async fn guild_member_counts(&self) -> BatchResult<Vec<GuildMemberCount>> {
        let rows = with_pool!(
            self,
            "SELECT guild_id, COUNT(*) AS members FROM guild_member \
             WHERE date_joined IS NOT NULL GROUP BY guild_id",
            |pool, sql| {
                sqlx::query_as::<_, GuildMemberCount>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn set_guild_members(&self, guild_id: i64, members: i64) -> BatchResult<()> {
        with_pool!(
            self,
            "UPDATE guild SET members = ? WHERE guild_id = ?",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(members)
                    .bind(guild_id)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn active_base_weekly_tasks(&self) -> BatchResult<Vec<WeeklyTask>> {
        let rows = with_pool!(
            self,
            "SELECT weekly_id, label, target_mode, target, reward, series FROM guild_weekly_task \
             WHERE active = 1 AND series = 0 ORDER BY weekly_id",
            |pool, sql| {
                sqlx::query_as::<_, WeeklyTask>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// The active level that follows `weekly_id`, if any.
    pub async fn next_weekly_level(&self, weekly_id: i64) -> BatchResult<Option<WeeklyTask>> {
        let row = with_pool!(
            self,
            "SELECT weekly_id, label, target_mode, target, reward, series FROM guild_weekly_task \
             WHERE active = 1 AND series = ? ORDER BY weekly_id LIMIT 1",
            |pool, sql| {
                sqlx::query_as::<_, WeeklyTask>(sql)
                    .bind(weekly_id)
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(row)
    }

    pub async fn add_weekly_progress(
        &self,
        guild: GuildId,
        weekly_key: &str,
        week: WeekLabel,
        delta: f64,
        now: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO guild_weekly_status (guild_id, weekly_key, week, year, progress, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (guild_id, weekly_key, week, year) DO UPDATE SET \
                 progress = guild_weekly_status.progress + excluded.progress, \
                 last_updated = excluded.last_updated",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(guild.get())
                    .bind(weekly_key)
                    .bind(i64::from(week.week))
                    .bind(i64::from(week.year))
                    .bind(delta)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn weekly_progress(&self, week: WeekLabel) -> BatchResult<Vec<WeeklyProgress>> {
        let rows = with_pool!(
            self,
            "SELECT guild_id, weekly_key, progress FROM guild_weekly_status WHERE week = ? AND year = ?",
            |pool, sql| {
                sqlx::query_as::<_, WeeklyProgress>(sql)
                    .bind(i64::from(week.week))
                    .bind(i64::from(week.year))
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn weekly_claims(&self, week: WeekLabel) -> BatchResult<Vec<WeeklyClaim>> {
        let rows = with_pool!(
            self,
            "SELECT guild_id, weekly_id, week, year, reward, transaction_id, date_claimed \
             FROM guild_weekly_claim WHERE week = ? AND year = ? ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, WeeklyClaim>(sql)
                    .bind(i64::from(week.week))
                    .bind(i64::from(week.year))
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// Record a claim. Returns `false` when the guild already claimed this
    /// task in this week.
    pub async fn insert_weekly_claim(
        &self,
        guild: GuildId,
        task: &WeeklyTask,
        week: WeekLabel,
        now: NaiveDateTime,
    ) -> BatchResult<bool> {
        let result = with_pool!(
            self,
            "INSERT INTO guild_weekly_claim (guild_id, weekly_id, week, year, reward, date_claimed) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(guild.get())
                    .bind(task.weekly_id)
                    .bind(i64::from(week.week))
                    .bind(i64::from(week.year))
                    .bind(task.reward)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_claim_transaction(
        &self,
        guild: GuildId,
        weekly_id: i64,
        week: WeekLabel,
        transaction_id: &str,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "UPDATE guild_weekly_claim SET transaction_id = ? \
             WHERE guild_id = ? AND weekly_id = ? AND week = ? AND year = ?",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(transaction_id)
                    .bind(guild.get())
                    .bind(weekly_id)
                    .bind(i64::from(week.week))
                    .bind(i64::from(week.year))
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }
}
