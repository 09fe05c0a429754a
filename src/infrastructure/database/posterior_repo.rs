//! SQLite implementation of the posterior repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ArmPosterior;
use crate::domain::ports::PosteriorRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct PosteriorRepositoryImpl {
    pool: SqlitePool,
}

impl PosteriorRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_posterior(row: &sqlx::sqlite::SqliteRow) -> DomainResult<ArmPosterior> {
        use sqlx::Row;

        Ok(ArmPosterior {
            arm_id: row.get("arm_id"),
            alpha: row.get("alpha"),
            beta: row.get("beta"),
            spend: row.get("spend"),
            reward_sum: row.get("reward_sum"),
            reward_sq_sum: row.get("reward_sq_sum"),
            trials: row.get::<i64, _>("trials").max(0) as u64,
            updated_at: parse_datetime(row.get::<String, _>("updated_ts").as_str())
                .map_err(|e| DomainError::DatabaseError(e.to_string()))?,
        })
    }
}

#[async_trait]
impl PosteriorRepository for PosteriorRepositoryImpl {
    async fn get(&self, arm_id: i64) -> DomainResult<Option<ArmPosterior>> {
        let row = sqlx::query("SELECT * FROM posteriors WHERE arm_id = ?")
            .bind(arm_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_posterior).transpose()
    }

    async fn upsert(&self, posterior: &ArmPosterior) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO posteriors
              (arm_id, alpha, beta, spend, reward_sum, reward_sq_sum, trials, updated_ts)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(arm_id) DO UPDATE SET
                alpha = excluded.alpha,
                beta = excluded.beta,
                spend = excluded.spend,
                reward_sum = excluded.reward_sum,
                reward_sq_sum = excluded.reward_sq_sum,
                trials = excluded.trials,
                updated_ts = excluded.updated_ts",
        )
        .bind(posterior.arm_id)
        .bind(posterior.alpha)
        .bind(posterior.beta)
        .bind(posterior.spend)
        .bind(posterior.reward_sum)
        .bind(posterior.reward_sq_sum)
        .bind(posterior.trials as i64)
        .bind(posterior.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn for_campaign(&self, campaign_id: i64) -> DomainResult<Vec<ArmPosterior>> {
        let rows = sqlx::query(
            r"SELECT p.* FROM posteriors p
              JOIN arms a ON a.id = p.arm_id
              WHERE a.campaign_id = ?
              ORDER BY a.arm_key",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_posterior).collect()
    }

    async fn campaign_spend(&self, campaign_id: i64) -> DomainResult<f64> {
        use sqlx::Row;

        let row = sqlx::query(
            r"SELECT COALESCE(SUM(p.spend), 0.0) AS total FROM posteriors p
              JOIN arms a ON a.id = p.arm_id
              WHERE a.campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }
}
