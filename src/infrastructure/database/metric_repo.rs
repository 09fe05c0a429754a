//! SQLite implementation of the metric repository.
//!
//! The `(arm_id, ts, source)` primary key makes re-ingestion idempotent:
//! `INSERT OR IGNORE` reports zero affected rows for a duplicate and the
//! stored row is left bit-identical.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Metric, MetricQuality, MetricSource};
use crate::domain::ports::{InsertOutcome, MetricRepository};
use crate::infrastructure::database::utils::parse_datetime;

pub struct MetricRepositoryImpl {
    pool: SqlitePool,
}

impl MetricRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_metric(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Metric> {
        use sqlx::Row;

        let source_str: String = row.get("source");
        let quality_str: String = row.get("quality");
        Ok(Metric {
            arm_id: row.get("arm_id"),
            ts: parse_datetime(row.get::<String, _>("ts").as_str())
                .map_err(|e| DomainError::DatabaseError(e.to_string()))?,
            source: MetricSource::from_str(&source_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown metric source '{source_str}'"))
            })?,
            impressions: row.get::<i64, _>("impressions").max(0) as u64,
            clicks: row.get::<i64, _>("clicks").max(0) as u64,
            conversions: row.get::<i64, _>("conversions").max(0) as u64,
            cost: row.get("cost"),
            revenue: row.get("revenue"),
            quality: MetricQuality::from_str(&quality_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown metric quality '{quality_str}'"))
            })?,
        })
    }
}

#[async_trait]
impl MetricRepository for MetricRepositoryImpl {
    async fn record(&self, metric: &Metric) -> DomainResult<InsertOutcome> {
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO metrics
              (arm_id, ts, source, impressions, clicks, conversions, cost, revenue, quality)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(metric.arm_id)
        .bind(metric.ts.to_rfc3339())
        .bind(metric.source.as_str())
        .bind(metric.impressions as i64)
        .bind(metric.clicks as i64)
        .bind(metric.conversions as i64)
        .bind(metric.cost)
        .bind(metric.revenue)
        .bind(metric.quality.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::DuplicateIgnored)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn range(
        &self,
        arm_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Metric>> {
        let rows = sqlx::query(
            "SELECT * FROM metrics WHERE arm_id = ? AND ts >= ? AND ts < ? ORDER BY ts",
        )
        .bind(arm_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_metric).collect()
    }

    async fn recent_roas(&self, arm_id: i64, since: DateTime<Utc>) -> DomainResult<Vec<f64>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r"SELECT cost, revenue FROM metrics
              WHERE arm_id = ? AND ts >= ? AND quality = 'ok' AND cost > 0
              ORDER BY ts",
        )
        .bind(arm_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let cost: f64 = row.get("cost");
                let revenue: f64 = row.get("revenue");
                revenue / cost
            })
            .collect())
    }

    async fn latest_ts(
        &self,
        campaign_id: i64,
        source: MetricSource,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        use sqlx::Row;

        let row = sqlx::query(
            r"SELECT MAX(m.ts) AS latest FROM metrics m
              JOIN arms a ON a.id = m.arm_id
              WHERE a.campaign_id = ? AND m.source = ?",
        )
        .bind(campaign_id)
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;

        let latest: Option<String> = row.get("latest");
        latest
            .as_deref()
            .map(|s| parse_datetime(s).map_err(|e| DomainError::DatabaseError(e.to_string())))
            .transpose()
    }
}
