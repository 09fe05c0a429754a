//! SQLite implementation of the campaign repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Arm, Campaign, CampaignStatus, NewArm, NewCampaign, PrimaryKpi};
use crate::domain::ports::CampaignRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct CampaignRepositoryImpl {
    pool: SqlitePool,
}

impl CampaignRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_campaign(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Campaign> {
        use sqlx::Row;

        let status_str: String = row.get("status");
        let kpi_str: String = row.get("primary_kpi");
        Ok(Campaign {
            id: row.get("id"),
            name: row.get("name"),
            total_budget: row.get("budget"),
            start: parse_datetime(row.get::<String, _>("start_ts").as_str())
                .map_err(|e| DomainError::DatabaseError(e.to_string()))?,
            end: row
                .get::<Option<String>, _>("end_ts")
                .as_ref()
                .and_then(|s| parse_datetime(s).ok()),
            status: CampaignStatus::from_str(&status_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown campaign status '{status_str}'"))
            })?,
            primary_kpi: PrimaryKpi::from_str(&kpi_str).ok_or_else(|| {
                DomainError::DatabaseError(format!("unknown primary kpi '{kpi_str}'"))
            })?,
            risk_tolerance: row.get("risk_tolerance"),
            variance_limit: row.get("variance_limit"),
            cadence_ms: row.get::<i64, _>("cadence_ms").max(0) as u64,
        })
    }

    fn row_to_arm(row: &sqlx::sqlite::SqliteRow) -> Arm {
        use sqlx::Row;

        Arm {
            id: row.get("id"),
            campaign_id: row.get("campaign_id"),
            platform: row.get("platform"),
            channel: row.get("channel"),
            creative: row.get("creative"),
            bid: row.get("bid"),
            disabled: row.get::<i64, _>("disabled") != 0,
        }
    }
}

#[async_trait]
impl CampaignRepository for CampaignRepositoryImpl {
    async fn create(&self, campaign: &NewCampaign) -> DomainResult<Campaign> {
        campaign.validate()?;

        let start = campaign.start.to_rfc3339();
        let end = campaign.end.map(|e| e.to_rfc3339());
        let result = sqlx::query(
            r"INSERT INTO campaigns
              (name, budget, start_ts, end_ts, status, primary_kpi, risk_tolerance, variance_limit, cadence_ms)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.name)
        .bind(campaign.total_budget)
        .bind(&start)
        .bind(&end)
        .bind(CampaignStatus::Draft.as_str())
        .bind(campaign.primary_kpi.as_str())
        .bind(campaign.risk_tolerance)
        .bind(campaign.variance_limit)
        .bind(campaign.cadence_ms as i64)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(campaign_id = id, name = %campaign.name, "campaign created");

        Ok(Campaign {
            id,
            name: campaign.name.clone(),
            total_budget: campaign.total_budget,
            start: campaign.start,
            end: campaign.end,
            status: CampaignStatus::Draft,
            primary_kpi: campaign.primary_kpi,
            risk_tolerance: campaign.risk_tolerance,
            variance_limit: campaign.variance_limit,
            cadence_ms: campaign.cadence_ms,
        })
    }

    async fn get(&self, id: i64) -> DomainResult<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_campaign).transpose()
    }

    async fn list(&self, status: Option<CampaignStatus>) -> DomainResult<Vec<Campaign>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM campaigns WHERE status = ? ORDER BY id")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM campaigns ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_campaign).collect()
    }

    async fn update_status(&self, id: i64, status: CampaignStatus) -> DomainResult<()> {
        let current = self
            .get(id)
            .await?
            .ok_or(DomainError::CampaignNotFound(id))?;

        if !current.status.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        sqlx::query("UPDATE campaigns SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(campaign_id = id, status = status.as_str(), "campaign status updated");
        Ok(())
    }

    async fn add_arm(&self, campaign_id: i64, arm: &NewArm) -> DomainResult<Arm> {
        arm.validate()?;

        self.get(campaign_id)
            .await?
            .ok_or(DomainError::CampaignNotFound(campaign_id))?;

        let key = arm.arm_key();
        let result = sqlx::query(
            r"INSERT INTO arms (campaign_id, platform, channel, creative, bid, disabled, arm_key)
              VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(campaign_id)
        .bind(&arm.platform)
        .bind(&arm.channel)
        .bind(&arm.creative)
        .bind(arm.bid)
        .bind(&key)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(DomainError::DuplicateArmKey { campaign_id, key });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Arm {
            id: result.last_insert_rowid(),
            campaign_id,
            platform: arm.platform.clone(),
            channel: arm.channel.clone(),
            creative: arm.creative.clone(),
            bid: arm.bid,
            disabled: false,
        })
    }

    async fn get_arm(&self, arm_id: i64) -> DomainResult<Option<Arm>> {
        let row = sqlx::query("SELECT * FROM arms WHERE id = ?")
            .bind(arm_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_arm))
    }

    async fn list_arms(&self, campaign_id: i64) -> DomainResult<Vec<Arm>> {
        let rows = sqlx::query("SELECT * FROM arms WHERE campaign_id = ? ORDER BY arm_key")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_arm).collect())
    }

    async fn find_arm_by_key(
        &self,
        campaign_id: i64,
        arm_key: &str,
    ) -> DomainResult<Option<Arm>> {
        let row = sqlx::query("SELECT * FROM arms WHERE campaign_id = ? AND arm_key = ?")
            .bind(campaign_id)
            .bind(arm_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_arm))
    }

    async fn set_arm_disabled(&self, arm_id: i64, disabled: bool) -> DomainResult<()> {
        let result = sqlx::query("UPDATE arms SET disabled = ? WHERE id = ?")
            .bind(i64::from(disabled))
            .bind(arm_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ArmNotFound(arm_id));
        }
        Ok(())
    }
}
