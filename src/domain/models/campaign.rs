//! Campaign domain model.
//!
//! A campaign is a budget-bounded, time-bounded collection of arms
//! optimized toward a single KPI. Its status drives the scheduler: only
//! Active campaigns tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a campaign in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Defined but not yet optimizing.
    Draft,
    /// Ticking: one decision cycle per cadence.
    Active,
    /// Suspended at a tick boundary; resumable.
    Paused,
    /// Budget exhausted or ended (terminal).
    Completed,
    /// Invariant breach or repeated store failure (terminal, manually resettable).
    Errored,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" | "complete" => Some(Self::Completed),
            "errored" | "error" => Some(Self::Errored),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [CampaignStatus] {
        match self {
            Self::Draft => &[Self::Active],
            Self::Active => &[Self::Paused, Self::Completed, Self::Errored],
            Self::Paused => &[Self::Active, Self::Completed, Self::Errored],
            Self::Completed => &[],
            // Manual reset path after operator intervention.
            Self::Errored => &[Self::Draft],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// The KPI a campaign optimizes toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKpi {
    Roas,
    Cpa,
    Revenue,
    Conversions,
}

impl Default for PrimaryKpi {
    fn default() -> Self {
        Self::Roas
    }
}

impl PrimaryKpi {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roas => "roas",
            Self::Cpa => "cpa",
            Self::Revenue => "revenue",
            Self::Conversions => "conversions",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "roas" => Some(Self::Roas),
            "cpa" => Some(Self::Cpa),
            "revenue" => Some(Self::Revenue),
            "conversions" => Some(Self::Conversions),
            _ => None,
        }
    }
}

/// A persisted campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub total_budget: f64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    pub primary_kpi: PrimaryKpi,
    /// How aggressively to discount risky arms, in `[0, 1]`.
    pub risk_tolerance: f64,
    /// Reward-variance ceiling feeding the risk score.
    pub variance_limit: f64,
    /// Decision cycle cadence in milliseconds.
    pub cadence_ms: u64,
}

impl Campaign {
    /// Deterministic cycle index for a wall-clock instant.
    ///
    /// Ticks count whole cadences elapsed since `start`; the pair
    /// `(campaign id, tick)` seeds the decision RNG so a cycle can be
    /// replayed exactly.
    pub fn cycle_tick(&self, now: DateTime<Utc>) -> u64 {
        let elapsed_ms = now.signed_duration_since(self.start).num_milliseconds();
        if elapsed_ms <= 0 || self.cadence_ms == 0 {
            return 0;
        }
        #[allow(clippy::cast_sign_loss)]
        let elapsed = elapsed_ms as u64;
        elapsed / self.cadence_ms
    }
}

/// A campaign awaiting insertion (no row id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub total_budget: f64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub primary_kpi: PrimaryKpi,
    pub risk_tolerance: f64,
    pub variance_limit: f64,
    pub cadence_ms: u64,
}

impl NewCampaign {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "campaign name cannot be empty".to_string(),
            ));
        }
        if !self.total_budget.is_finite() || self.total_budget <= 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "campaign budget must be positive, got {}",
                self.total_budget
            )));
        }
        if !(0.0..=1.0).contains(&self.risk_tolerance) {
            return Err(DomainError::ValidationFailed(format!(
                "risk_tolerance must be in [0, 1], got {}",
                self.risk_tolerance
            )));
        }
        if !self.variance_limit.is_finite() || self.variance_limit < 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "variance_limit must be non-negative, got {}",
                self.variance_limit
            )));
        }
        if self.cadence_ms == 0 {
            return Err(DomainError::ValidationFailed(
                "cadence_ms must be positive".to_string(),
            ));
        }
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(DomainError::ValidationFailed(
                    "campaign end must be after start".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_campaign() -> NewCampaign {
        NewCampaign {
            name: "spring-push".to_string(),
            total_budget: 10_000.0,
            start: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            end: None,
            primary_kpi: PrimaryKpi::Roas,
            risk_tolerance: 0.5,
            variance_limit: 4.0,
            cadence_ms: 900_000,
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Active));
        assert!(CampaignStatus::Active.can_transition_to(CampaignStatus::Paused));
        assert!(CampaignStatus::Paused.can_transition_to(CampaignStatus::Active));
        assert!(CampaignStatus::Active.can_transition_to(CampaignStatus::Completed));
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Active));
        assert!(!CampaignStatus::Draft.can_transition_to(CampaignStatus::Paused));
        assert!(CampaignStatus::Errored.can_transition_to(CampaignStatus::Draft));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Errored.is_terminal());
        assert!(!CampaignStatus::Active.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Active,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Errored,
        ] {
            assert_eq!(CampaignStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_cycle_tick() {
        let draft = valid_campaign();
        let campaign = Campaign {
            id: 1,
            name: draft.name,
            total_budget: draft.total_budget,
            start: draft.start,
            end: None,
            status: CampaignStatus::Active,
            primary_kpi: PrimaryKpi::Roas,
            risk_tolerance: 0.5,
            variance_limit: 4.0,
            cadence_ms: 900_000,
        };
        assert_eq!(campaign.cycle_tick(campaign.start), 0);
        let later = campaign.start + chrono::Duration::minutes(45);
        assert_eq!(campaign.cycle_tick(later), 3);
        let before = campaign.start - chrono::Duration::minutes(5);
        assert_eq!(campaign.cycle_tick(before), 0);
    }

    #[test]
    fn test_validate_rejects_bad_budget() {
        let mut c = valid_campaign();
        c.total_budget = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_risk_out_of_range() {
        let mut c = valid_campaign();
        c.risk_tolerance = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_end_before_start() {
        let mut c = valid_campaign();
        c.end = Some(c.start - chrono::Duration::days(1));
        assert!(c.validate().is_err());
    }
}
