//! Per-job run cursor.
//!
//! A watermark remembers the last calendar day a date-window job has
//! processed and when any guarded job last started. Guarded jobs stamp
//! `last_run_at` before they do any work, so a run that dies halfway leaves
//! the job "ran today" until an operator resets it.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::FromRow;

use super::{with_pool, Database};
use crate::errors::BatchResult;

/// How often a guarded job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPeriod {
    /// Once per calendar day.
    Daily,
    /// At most once per interval.
    Interval(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RunWatermark {
    pub job_name: String,
    pub last_processed_date: Option<NaiveDate>,
    pub last_run_at: Option<NaiveDateTime>,
}

impl RunWatermark {
    /// Watermark of a job that never ran.
    pub fn empty(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            last_processed_date: None,
            last_run_at: None,
        }
    }

    pub fn is_eligible(&self, period: RunPeriod, now: NaiveDateTime) -> bool {
        let Some(last) = self.last_run_at else {
            return true;
        };
        match period {
            RunPeriod::Daily => last.date() != now.date(),
            RunPeriod::Interval(interval) => last < now - interval,
        }
    }

    /// First day of the next window, one day after the last processed one.
    /// `None` when the job has never been given a starting date.
    pub fn next_window_start(&self) -> Option<NaiveDate> {
        self.last_processed_date.and_then(|d| d.succ_opt())
    }
}

impl Database {
    pub async fn get_watermark(&self, job_name: &str) -> BatchResult<Option<RunWatermark>> {
        let row = with_pool!(
            self,
            "SELECT job_name, last_processed_date, last_run_at FROM job_watermark WHERE job_name = ?",
            |pool, sql| {
                sqlx::query_as::<_, RunWatermark>(sql)
                    .bind(job_name)
                    .fetch_optional(pool)
                    .await
            }
        )?;
        Ok(row)
    }

    /// The job's watermark, or an empty one if it never ran.
    pub async fn load_watermark(&self, job_name: &str) -> BatchResult<RunWatermark> {
        Ok(self
            .get_watermark(job_name)
            .await?
            .unwrap_or_else(|| RunWatermark::empty(job_name)))
    }

    pub async fn list_watermarks(&self) -> BatchResult<Vec<RunWatermark>> {
        let rows = with_pool!(
            self,
            "SELECT job_name, last_processed_date, last_run_at FROM job_watermark ORDER BY job_name",
            |pool, sql| {
                sqlx::query_as::<_, RunWatermark>(sql)
                    .fetch_all(pool)
                    .await
            }
        )?;
        Ok(rows)
    }

    pub async fn is_eligible(
        &self,
        job_name: &str,
        period: RunPeriod,
        now: NaiveDateTime,
    ) -> BatchResult<bool> {
        Ok(self.load_watermark(job_name).await?.is_eligible(period, now))
    }

    /// Record that a run has started.
    pub async fn mark_run_started(&self, job_name: &str, now: NaiveDateTime) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO job_watermark (job_name, last_run_at) VALUES (?, ?) \
             ON CONFLICT (job_name) DO UPDATE SET last_run_at = excluded.last_run_at",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(job_name)
                    .bind(now)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    /// Finish a run: stamp `last_run_at` and, for date-window jobs, advance
    /// `last_processed_date`.
    pub async fn commit_watermark(
        &self,
        job_name: &str,
        processed_through: Option<NaiveDate>,
        ran_at: NaiveDateTime,
    ) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO job_watermark (job_name, last_processed_date, last_run_at) VALUES (?, ?, ?) \
             ON CONFLICT (job_name) DO UPDATE SET \
                 last_processed_date = COALESCE(excluded.last_processed_date, job_watermark.last_processed_date), \
                 last_run_at = excluded.last_run_at",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(job_name)
                    .bind(processed_through)
                    .bind(ran_at)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    /// Seed or move the processed date of a date-window job.
    pub async fn set_watermark_date(&self, job_name: &str, date: NaiveDate) -> BatchResult<()> {
        with_pool!(
            self,
            "INSERT INTO job_watermark (job_name, last_processed_date) VALUES (?, ?) \
             ON CONFLICT (job_name) DO UPDATE SET last_processed_date = excluded.last_processed_date",
            |pool, sql| {
                sqlx::query(sql)
                    .bind(job_name)
                    .bind(date)
                    .execute(pool)
                    .await
            }
        )?;
        Ok(())
    }

    /// Forget the last run so the job becomes eligible again.
    pub async fn reset_watermark_run(&self, job_name: &str) -> BatchResult<bool> {
        let result = with_pool!(
            self,
            "UPDATE job_watermark SET last_run_at = NULL WHERE job_name = ?",
            |pool, sql| sqlx::query(sql).bind(job_name).execute(pool).await
        )?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn never_run_is_eligible() {
        let wm = RunWatermark::empty("faucet-claim-stats");
        assert!(wm.is_eligible(RunPeriod::Daily, at(2024, 5, 1, 0, 5)));
        assert!(wm.next_window_start().is_none());
    }

    #[test]
    fn daily_period_follows_calendar_day() {
        let mut wm = RunWatermark::empty("faucet-claim-stats");
        wm.last_run_at = Some(at(2024, 5, 1, 0, 5));
        assert!(!wm.is_eligible(RunPeriod::Daily, at(2024, 5, 1, 23, 59)));
        assert!(wm.is_eligible(RunPeriod::Daily, at(2024, 5, 2, 0, 0)));
    }

    #[test]
    fn interval_period() {
        let mut wm = RunWatermark::empty("check-ptc-payments");
        wm.last_run_at = Some(at(2024, 5, 1, 10, 0));
        let period = RunPeriod::Interval(Duration::minutes(30));
        assert!(!wm.is_eligible(period, at(2024, 5, 1, 10, 30)));
        assert!(wm.is_eligible(period, at(2024, 5, 1, 10, 31)));
    }

    #[test]
    fn window_advances_one_day() {
        let mut wm = RunWatermark::empty("withdraw-stats");
        wm.last_processed_date = NaiveDate::from_ymd_opt(2023, 12, 31);
        assert_eq!(wm.next_window_start(), NaiveDate::from_ymd_opt(2024, 1, 1));
    }
}
