//! Statistics counters keyed by `(subject_kind, subject_id, stat_key)`.
//!
//! Both operations are a single upsert statement, so two sequential
//! contributions always add up and a concurrent writer cannot lose an update.

use chrono::NaiveDateTime;
use sqlx::FromRow;

use super::{with_pool, Database};
use crate::errors::BatchResult;
use crate::types::Subject;

/// One persisted counter row.
#[derive(Debug, Clone, FromRow)]
pub struct StatCounter {
    pub subject_kind: String,
    pub subject_id: i64,
    pub stat_key: String,
    pub value: f64,
    pub last_updated: NaiveDateTime,
}

const UPSERT_ADD: &str = r#"
    INSERT INTO stat_counter (subject_kind, subject_id, stat_key, value, last_updated)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (subject_kind, subject_id, stat_key) DO UPDATE SET
        value = stat_counter.value + excluded.value,
        last_updated = excluded.last_updated
    RETURNING value
"#;

const UPSERT_REPLACE: &str = r#"
    INSERT INTO stat_counter (subject_kind, subject_id, stat_key, value, last_updated)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (subject_kind, subject_id, stat_key) DO UPDATE SET
        value = excluded.value,
        last_updated = excluded.last_updated
    RETURNING value
"#;

impl Database {
    /// Add `delta` to a counter, creating it with `delta` when absent.
    /// Returns the new value.
    pub async fn upsert_counter(
        &self,
        subject: Subject,
        stat_key: &str,
        delta: f64,
        now: NaiveDateTime,
    ) -> BatchResult<f64> {
        self.write_counter(UPSERT_ADD, subject, stat_key, delta, now)
            .await
    }

    /// Overwrite a counter with a snapshot value, creating it when absent.
    pub async fn replace_counter(
        &self,
        subject: Subject,
        stat_key: &str,
        value: f64,
        now: NaiveDateTime,
    ) -> BatchResult<f64> {
        self.write_counter(UPSERT_REPLACE, subject, stat_key, value, now)
            .await
    }

    async fn write_counter(
        &self,
        statement: &str,
        subject: Subject,
        stat_key: &str,
        value: f64,
        now: NaiveDateTime,
    ) -> BatchResult<f64> {
        let value = with_pool!(self, statement, |pool, sql| {
            sqlx::query_scalar::<_, f64>(sql)
                .bind(subject.kind())
                .bind(subject.id())
                .bind(stat_key)
                .bind(value)
                .bind(now)
                .fetch_one(pool)
                .await
        })?;
        Ok(value)
    }

    /// Fetch a single counter.
    pub async fn get_counter(
        &self,
        subject: Subject,
        stat_key: &str,
    ) -> BatchResult<Option<StatCounter>> {
        let row = with_pool!(
            self,
            "SELECT subject_kind, subject_id, stat_key, value, last_updated \
             FROM stat_counter WHERE subject_kind = ? AND subject_id = ? AND stat_key = ?",
            |pool, sql| {
                sqlx::query_as::<_, StatCounter>(sql)
                    .bind(subject.kind())
                    .bind(subject.id())
                    .bind(stat_key)
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(row)
    }

    /// Current value of a counter, `0.0` when it does not exist yet.
    pub async fn counter_value(&self, subject: Subject, stat_key: &str) -> BatchResult<f64> {
        Ok(self
            .get_counter(subject, stat_key)
            .await?
            .map(|c| c.value)
            .unwrap_or(0.0))
    }

    /// All counters of one subject, ordered by key.
    pub async fn counters_for(&self, subject: Subject) -> BatchResult<Vec<StatCounter>> {
        let rows = with_pool!(
            self,
            "SELECT subject_kind, subject_id, stat_key, value, last_updated \
             FROM stat_counter WHERE subject_kind = ? AND subject_id = ? ORDER BY stat_key",
            |pool, sql| {
                sqlx::query_as::<_, StatCounter>(sql)
                    .bind(subject.kind())
                    .bind(subject.id())
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }
}
