//! SQLite implementation of the append-only change log.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AllocationChange, ChangeReason, InitiatedBy};
use crate::domain::ports::ChangeLogRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct ChangeLogRepositoryImpl {
    pool: SqlitePool,
}

impl ChangeLogRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_change(row: &sqlx::sqlite::SqliteRow) -> DomainResult<AllocationChange> {
        use sqlx::Row;

        let reason_str: String = row.get("reason");
        let initiated_str: String = row.get("initiated_by");
        let factors: BTreeMap<String, f64> =
            serde_json::from_str(row.get::<String, _>("factors_json").as_str())?;
        let mmm_factors: BTreeMap<String, f64> =
            serde_json::from_str(row.get::<String, _>("mmm_json").as_str())?;
        let state_snapshot: serde_json::Value =
            serde_json::from_str(row.get::<String, _>("state_snapshot_json").as_str())?;

        Ok(AllocationChange {
            id: row.get("id"),
            campaign_id: row.get("campaign_id"),
            arm_id: row.get("arm_id"),
            ts: parse_datetime(row.get::<String, _>("ts").as_str())
                .map_err(|e| DomainError::DatabaseError(e.to_string()))?,
            old_alloc: row.get("old_alloc"),
            new_alloc: row.get("new_alloc"),
            reason: ChangeReason::from_str(&reason_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown change reason '{reason_str}'"))
            })?,
            factors,
            mmm_factors,
            initiated_by: InitiatedBy::from_str(&initiated_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown initiator '{initiated_str}'"))
            })?,
            state_snapshot,
        })
    }
}

#[async_trait]
impl ChangeLogRepository for ChangeLogRepositoryImpl {
    async fn append(&self, change: &AllocationChange) -> DomainResult<i64> {
        let result = sqlx::query(
            r"INSERT INTO allocation_changes
              (campaign_id, arm_id, ts, old_alloc, new_alloc, reason,
               factors_json, mmm_json, initiated_by, state_snapshot_json)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(change.campaign_id)
        .bind(change.arm_id)
        .bind(change.ts.to_rfc3339())
        .bind(change.old_alloc)
        .bind(change.new_alloc)
        .bind(change.reason.as_str())
        .bind(serde_json::to_string(&change.factors)?)
        .bind(serde_json::to_string(&change.mmm_factors)?)
        .bind(change.initiated_by.as_str())
        .bind(serde_json::to_string(&change.state_snapshot)?)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn range(
        &self,
        campaign_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<AllocationChange>> {
        let rows = sqlx::query(
            r"SELECT * FROM allocation_changes
              WHERE campaign_id = ? AND ts >= ? AND ts < ?
              ORDER BY ts, id
              LIMIT ?",
        )
        .bind(campaign_id)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_change).collect()
    }

    async fn latest_allocations(&self, campaign_id: i64) -> DomainResult<HashMap<i64, f64>> {
        use sqlx::Row;

        // Latest decision-bearing row per arm; event rows (errors, flags)
        // carry old_alloc == new_alloc so they are harmless here.
        let rows = sqlx::query(
            r"SELECT c.arm_id, c.new_alloc FROM allocation_changes c
              JOIN (SELECT arm_id, MAX(id) AS max_id FROM allocation_changes
                    WHERE campaign_id = ? GROUP BY arm_id) latest
              ON latest.max_id = c.id",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<i64, _>("arm_id"), row.get::<f64, _>("new_alloc")))
            .collect())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM allocation_changes WHERE ts < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
