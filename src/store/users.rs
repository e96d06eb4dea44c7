use chrono::NaiveDateTime;
use sqlx::FromRow;
use std::collections::HashSet;

use super::{with_pool, Database};
use crate::errors::BatchResult;

/// Setting that marks a temporarily banned user.
pub const TEMPBAN_SETTING: &str = "user-tempban";

/// A user account created inside a statistics window.
#[derive(Debug, Clone, FromRow)]
pub struct NewAccount {
    pub user_id: i64,
    pub ref_user_id: i64,
}

impl Database {
    /// Flip every online user idle since `cutoff` to offline.
    pub async fn set_idle_users_offline(&self, cutoff: NaiveDateTime) -> BatchResult<u64> {
        let result = with_pool!(
            self,
            "UPDATE users SET is_online = 0 \
             WHERE is_online = 1 AND (last_action IS NULL OR last_action <= ?)",
            |pool, sql| sqlx::query(sql).bind(cutoff).execute(pool).await
        )?;
        Ok(result.rows_affected())
    }

    pub async fn users_created_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<NewAccount>> {
        let rows = with_pool!(
            self,
            "SELECT user_id, ref_user_id FROM users WHERE created_date >= ? AND created_date < ?",
            |pool, sql| {
                sqlx::query_as::<_, NewAccount>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// Number of users whose last action falls inside `[start, end)`.
    pub async fn count_users_active_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<i64> {
        let count = with_pool!(
            self,
            "SELECT COUNT(*) FROM users WHERE last_action >= ? AND last_action < ?",
            |pool, sql| {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_one(pool)
                    .await
            }
        )?;
        Ok(count)
    }

    pub async fn user_exists(&self, user_id: i64) -> BatchResult<bool> {
        let count = with_pool!(
            self,
            "SELECT COUNT(*) FROM users WHERE user_id = ?",
            |pool, sql| {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
            }
        )?;
        Ok(count > 0)
    }

    /// Ids of users carrying the temp-ban setting.
    pub async fn tempbanned_user_ids(&self) -> BatchResult<HashSet<i64>> {
        let ids = with_pool!(
            self,
            "SELECT user_id FROM user_setting WHERE setting_name = ?",
            |pool, sql| {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(TEMPBAN_SETTING)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(ids.into_iter().collect())
    }

    /// Mark an achievement as completed. Returns `false` if it already was.
    pub async fn complete_achievement(
        &self,
        user_id: i64,
        achievement_key: &str,
        now: NaiveDateTime,
    ) -> BatchResult<bool> {
        let result = with_pool!(
            self,
            "INSERT INTO user_achievement (user_id, achievement_key, date_completed) \
             VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(user_id)
                    .bind(achievement_key)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(result.rows_affected() > 0)
    }
}
