//! Activity sources: offers, daily tasks, shortlinks, faucet claims and games.

use chrono::NaiveDateTime;
use sqlx::FromRow;

use super::{with_pool, Database};
use crate::errors::BatchResult;

#[derive(Debug, Clone, FromRow)]
pub struct OfferCompletion {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailyTaskCompletion {
    pub id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ShortlinkVisit {
    pub id: i64,
    pub user_id: i64,
    pub shortlink_id: i64,
    pub date_completed: Option<NaiveDateTime>,
}

impl ShortlinkVisit {
    pub fn is_completed(&self) -> bool {
        self.date_completed.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ShortlinkRates {
    pub shortlink_id: i64,
    pub started: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct FinishedMatch {
    pub host_user_id: i64,
    pub client_user_id: Option<i64>,
}

/// A user seen behind an IP address.
#[derive(Debug, Clone, FromRow)]
pub struct IpUse {
    pub user_id: i64,
    pub ip: String,
}

/// Tables consumed through a `stats_processed` flag.
#[derive(Debug, Clone, Copy)]
pub enum FlaggedSource {
    Offers,
    DailyTasks,
    ShortlinkVisits,
}

impl FlaggedSource {
    fn table(&self) -> &'static str {
        match self {
            FlaggedSource::Offers => "offerwall_completion",
            FlaggedSource::DailyTasks => "daily_task_completion",
            FlaggedSource::ShortlinkVisits => "shortlink_visit",
        }
    }
}

impl Database {
    pub async fn unprocessed_offers(&self) -> BatchResult<Vec<OfferCompletion>> {
        let rows = with_pool!(
            self,
            "SELECT id, user_id, amount FROM offerwall_completion WHERE stats_processed = 0 ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, OfferCompletion>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn unprocessed_daily_tasks(&self) -> BatchResult<Vec<DailyTaskCompletion>> {
        let rows = with_pool!(
            self,
            "SELECT id, user_id FROM daily_task_completion WHERE stats_processed = 0 ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, DailyTaskCompletion>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn unprocessed_shortlink_visits(&self) -> BatchResult<Vec<ShortlinkVisit>> {
        let rows = with_pool!(
            self,
            "SELECT id, user_id, shortlink_id, date_completed FROM shortlink_visit \
             WHERE stats_processed = 0 ORDER BY id",
            |pool, sql| {
                sqlx::query_as::<_, ShortlinkVisit>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// Set the `stats_processed` flag on the given rows.
    pub async fn mark_processed(&self, source: FlaggedSource, ids: &[i64]) -> BatchResult<u64> {
        let update_sql = format!(
            "UPDATE {} SET stats_processed = 1 WHERE id = ?",
            source.table()
        );
        let mut marked = 0;
        for id in ids {
            let result = with_pool!(self, &update_sql, |pool, sql| {
                sqlx::query(sql).bind(*id).execute(pool).await
            })?;
            marked += result.rows_affected();
        }
        Ok(marked)
    }

    /// Accumulate started/completed visits of one shortlink.
    pub async fn add_shortlink_rates(
        &self,
        shortlink_id: i64,
        started: i64,
        completed: i64,
        now: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO shortlink_stats (shortlink_id, started, completed, last_updated) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (shortlink_id) DO UPDATE SET \
                 started = shortlink_stats.started + excluded.started, \
                 completed = shortlink_stats.completed + excluded.completed, \
                 last_updated = excluded.last_updated",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(shortlink_id)
                    .bind(started)
                    .bind(completed)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn shortlink_rates(&self) -> BatchResult<Vec<ShortlinkRates>> {
        let rows = with_pool!(
            self,
            "SELECT shortlink_id, started, completed FROM shortlink_stats ORDER BY shortlink_id",
            |pool, sql| {
                sqlx::query_as::<_, ShortlinkRates>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn set_shortlink_difficulty(
        &self,
        shortlink_id: i64,
        difficulty: &str,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "UPDATE shortlink SET difficulty = ? WHERE shortlink_id = ?",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(difficulty)
                    .bind(shortlink_id)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    pub async fn shortlink_difficulty(&self, shortlink_id: i64) -> BatchResult<Option<String>> {
        let difficulty = with_pool!(
            self,
            "SELECT difficulty FROM shortlink WHERE shortlink_id = ?",
            |pool, sql| {
                sqlx::query_scalar::<_, String>(sql)
                    .bind(shortlink_id)
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(difficulty)
    }

    /// User ids of every faucet claim inside `[start, end)`, one entry per claim.
    pub async fn claim_users_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<i64>> {
        let ids = with_pool!(
            self,
            "SELECT user_id FROM faucet_claim WHERE date >= ? AND date < ?",
            |pool, sql| {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(ids)
    }

    /// Claim IPs of unverified users since `since`.
    pub async fn unverified_claim_ips_since(
        &self,
        since: NaiveDateTime,
    ) -> BatchResult<Vec<IpUse>> {
        let rows = with_pool!(
            self,
            "SELECT c.user_id, c.claim_ip AS ip FROM faucet_claim c \
             JOIN users u ON u.user_id = c.user_id \
             WHERE c.date >= ? AND u.is_verified = 0",
            |pool, sql| {
                sqlx::query_as::<_, IpUse>(sql)
                    .bind(since)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn rps_matches_finished_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BatchResult<Vec<FinishedMatch>> {
        let rows = with_pool!(
            self,
            "SELECT host_user_id, client_user_id FROM rps_match \
             WHERE date_finished >= ? AND date_finished < ?",
            |pool, sql| {
                sqlx::query_as::<_, FinishedMatch>(sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    /// Release battleship matches whose client joined before `cutoff` but
    /// never placed a grid.
    pub async fn unlock_stale_ship_matches(&self, cutoff: NaiveDateTime) -> BatchResult<u64> {
        let result = with_pool!(
            self,
            "UPDATE ship_match SET client_user_id = NULL, date_matched = NULL \
             WHERE date_matched <= ? AND client_grid IS NULL",
            |pool, sql| sqlx::query(sql).bind(cutoff).execute(pool).await
        )?;
        Ok(result.rows_affected())
    }

    /// Release RPS matches joined before `cutoff` that never finished.
    pub async fn unlock_stale_rps_matches(&self, cutoff: NaiveDateTime) -> BatchResult<u64> {
        let result = with_pool!(
            self,
            "UPDATE rps_match SET client_user_id = NULL, date_matched = NULL \
             WHERE date_matched <= ? AND client_user_id IS NOT NULL AND date_finished IS NULL",
            |pool, sql| sqlx::query(sql).bind(cutoff).execute(pool).await
        )?;
        Ok(result.rows_affected())
    }
}
