//! Campaign repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Arm, Campaign, CampaignStatus, NewArm, NewCampaign};

/// Repository interface for Campaign and Arm persistence.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Insert a validated campaign and return it with its assigned id.
    async fn create(&self, campaign: &NewCampaign) -> DomainResult<Campaign>;

    /// Get a campaign by id.
    async fn get(&self, id: i64) -> DomainResult<Option<Campaign>>;

    /// List campaigns, optionally filtered by status.
    async fn list(&self, status: Option<CampaignStatus>) -> DomainResult<Vec<Campaign>>;

    /// Transition a campaign's status. Rejects invalid transitions.
    async fn update_status(&self, id: i64, status: CampaignStatus) -> DomainResult<()>;

    /// Insert a validated arm under a campaign. Rejects duplicate arm keys.
    async fn add_arm(&self, campaign_id: i64, arm: &NewArm) -> DomainResult<Arm>;

    /// Get one arm by id.
    async fn get_arm(&self, arm_id: i64) -> DomainResult<Option<Arm>>;

    /// All arms of a campaign, ordered by arm key.
    async fn list_arms(&self, campaign_id: i64) -> DomainResult<Vec<Arm>>;

    /// Find an arm by its campaign and key (webhook resolution path).
    async fn find_arm_by_key(&self, campaign_id: i64, arm_key: &str)
        -> DomainResult<Option<Arm>>;

    /// Pin an arm's allocation to zero (or lift the pin).
    async fn set_arm_disabled(&self, arm_id: i64, disabled: bool) -> DomainResult<()>;
}
