//! SQLite implementation of the intended-allocation journal.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{IntendedAllocation, JournalRepository};
use crate::infrastructure::database::utils::parse_datetime;

pub struct JournalRepositoryImpl {
    pool: SqlitePool,
}

impl JournalRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalRepository for JournalRepositoryImpl {
    async fn record(&self, intent: &IntendedAllocation) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO intended_allocations (campaign_id, arm_id, alloc, ts)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(campaign_id, arm_id) DO UPDATE SET
                alloc = excluded.alloc,
                ts = excluded.ts",
        )
        .bind(intent.campaign_id)
        .bind(intent.arm_id)
        .bind(intent.alloc)
        .bind(intent.ts.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending(&self) -> DomainResult<Vec<IntendedAllocation>> {
        use sqlx::Row;

        let rows = sqlx::query("SELECT * FROM intended_allocations ORDER BY ts, arm_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(IntendedAllocation {
                    campaign_id: row.get("campaign_id"),
                    arm_id: row.get("arm_id"),
                    alloc: row.get("alloc"),
                    ts: parse_datetime(row.get::<String, _>("ts").as_str())
                        .map_err(|e| DomainError::DatabaseError(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn clear(&self, campaign_id: i64, arm_id: i64) -> DomainResult<()> {
        sqlx::query("DELETE FROM intended_allocations WHERE campaign_id = ? AND arm_id = ?")
            .bind(campaign_id)
            .bind(arm_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
