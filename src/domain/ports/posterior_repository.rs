//! Posterior repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ArmPosterior;

/// Repository interface for per-arm posterior rows.
///
/// On restart the engine reconstructs in-memory state from the last
/// committed row per arm; the metric log is never replayed.
#[async_trait]
pub trait PosteriorRepository: Send + Sync {
    /// Last committed posterior for an arm, if any.
    async fn get(&self, arm_id: i64) -> DomainResult<Option<ArmPosterior>>;

    /// Upsert the full posterior row.
    async fn upsert(&self, posterior: &ArmPosterior) -> DomainResult<()>;

    /// All posteriors belonging to a campaign's arms.
    async fn for_campaign(&self, campaign_id: i64) -> DomainResult<Vec<ArmPosterior>>;

    /// Total spend across a campaign's arms (the `Σ S` of the budget
    /// invariant).
    async fn campaign_spend(&self, campaign_id: i64) -> DomainResult<f64>;
}
