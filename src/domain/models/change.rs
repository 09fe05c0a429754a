//! Allocation change records.
//!
//! Every decision that moves a campaign's allocation vector is recorded in
//! the append-only change log with full attribution: the factor
//! contributions that produced it, the MMM factors applied, and a snapshot
//! of the posterior state at decision time. The dashboard and the
//! explanation subsystem read these rows verbatim.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who initiated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatedBy {
    /// The optimizer itself.
    Auto,
    /// An analyst through the approval surface.
    Analyst,
    /// A manual override outside the decision algorithm.
    Override,
}

impl InitiatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Analyst => "analyst",
            Self::Override => "override",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "analyst" => Some(Self::Analyst),
            "override" => Some(Self::Override),
            _ => None,
        }
    }
}

/// Why a change-log row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// Regular decision-cycle reallocation.
    Decision,
    /// Allocations scaled down to fit the remaining budget.
    BudgetScale,
    /// Final row recording campaign completion.
    Completed,
    /// Metric ingest failed permanently for a platform.
    IngestError,
    /// A metric row was flagged suspect by the anomaly screen.
    AnomalyFlag,
    /// The budget invariant was breached; campaign moved to Errored.
    InvariantBreach,
    /// Store failure escalated the campaign to Errored.
    StoreFailure,
    /// Journaled allocation re-applied after a restart.
    Reconcile,
    /// Manual change outside the algorithm.
    ManualOverride,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::BudgetScale => "budget_scale",
            Self::Completed => "completed",
            Self::IngestError => "ingest_error",
            Self::AnomalyFlag => "anomaly_flag",
            Self::InvariantBreach => "invariant_breach",
            Self::StoreFailure => "store_failure",
            Self::Reconcile => "reconcile",
            Self::ManualOverride => "manual_override",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "decision" => Some(Self::Decision),
            "budget_scale" => Some(Self::BudgetScale),
            "completed" => Some(Self::Completed),
            "ingest_error" => Some(Self::IngestError),
            "anomaly_flag" => Some(Self::AnomalyFlag),
            "invariant_breach" => Some(Self::InvariantBreach),
            "store_failure" => Some(Self::StoreFailure),
            "reconcile" => Some(Self::Reconcile),
            "manual_override" => Some(Self::ManualOverride),
        _ => None,
        }
    }
}

/// One append-only allocation change.
///
/// Factor maps use `BTreeMap` so serialized JSON is byte-stable, which
/// keeps idempotence checks and replay diffs trivial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationChange {
    /// Row id; zero before insertion.
    pub id: i64,
    pub campaign_id: i64,
    pub arm_id: i64,
    pub ts: DateTime<Utc>,
    pub old_alloc: f64,
    pub new_alloc: f64,
    pub reason: ChangeReason,
    /// Per-step log-ratio contributions: thompson, risk, step_clip,
    /// budget_scale.
    pub factors: BTreeMap<String, f64>,
    /// Applied MMM multipliers as log-ratios: seasonality, carryover,
    /// external factors by name.
    pub mmm_factors: BTreeMap<String, f64>,
    pub initiated_by: InitiatedBy,
    /// Posterior state at decision time, for audit and replay.
    pub state_snapshot: serde_json::Value,
}

impl AllocationChange {
    /// Relative change, in percent of the old allocation.
    pub fn change_pct(&self) -> f64 {
        if self.old_alloc.abs() < f64::EPSILON {
            if self.new_alloc.abs() < f64::EPSILON {
                return 0.0;
            }
            return 100.0;
        }
        (self.new_alloc - self.old_alloc) / self.old_alloc * 100.0
    }

    /// A non-decision row (error, flag, reconcile) attributed to the engine.
    pub fn event(
        campaign_id: i64,
        arm_id: i64,
        ts: DateTime<Utc>,
        alloc: f64,
        reason: ChangeReason,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            campaign_id,
            arm_id,
            ts,
            old_alloc: alloc,
            new_alloc: alloc,
            reason,
            factors: BTreeMap::new(),
            mmm_factors: BTreeMap::new(),
            initiated_by: InitiatedBy::Auto,
            state_snapshot: detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_pct() {
        let mut c = AllocationChange::event(
            1,
            2,
            Utc::now(),
            0.25,
            ChangeReason::Decision,
            serde_json::json!({}),
        );
        c.old_alloc = 0.25;
        c.new_alloc = 0.30;
        assert!((c.change_pct() - 20.0).abs() < 1e-9);

        c.old_alloc = 0.0;
        c.new_alloc = 0.1;
        assert!((c.change_pct() - 100.0).abs() < 1e-9);

        c.new_alloc = 0.0;
        assert_eq!(c.change_pct(), 0.0);
    }

    #[test]
    fn test_reason_round_trip() {
        for r in [
            ChangeReason::Decision,
            ChangeReason::BudgetScale,
            ChangeReason::Completed,
            ChangeReason::IngestError,
            ChangeReason::AnomalyFlag,
            ChangeReason::InvariantBreach,
            ChangeReason::StoreFailure,
            ChangeReason::Reconcile,
            ChangeReason::ManualOverride,
        ] {
            assert_eq!(ChangeReason::from_str(r.as_str()), Some(r.clone()));
        }
    }
}
