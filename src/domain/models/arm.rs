//! Arm domain model.
//!
//! An arm is the atomic unit of allocation: an immutable
//! `(platform, channel, creative, bid)` tuple owned by exactly one
//! campaign. Arms are never destroyed; disabling one pins its
//! allocation to zero while preserving its history.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Build the stable key for an arm tuple.
///
/// The key is the deterministic concatenation of the four fields. Bids are
/// formatted with fixed precision so the same tuple always yields the same
/// key regardless of float formatting quirks.
pub fn arm_key(platform: &str, channel: &str, creative: &str, bid: f64) -> String {
    format!("{platform}:{channel}:{creative}:{bid:.4}")
}

/// A persisted arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub id: i64,
    pub campaign_id: i64,
    pub platform: String,
    pub channel: String,
    pub creative: String,
    pub bid: f64,
    pub disabled: bool,
}

impl Arm {
    pub fn arm_key(&self) -> String {
        arm_key(&self.platform, &self.channel, &self.creative, self.bid)
    }
}

/// An arm awaiting insertion (no row id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArm {
    pub platform: String,
    pub channel: String,
    pub creative: String,
    pub bid: f64,
}

impl NewArm {
    pub fn arm_key(&self) -> String {
        arm_key(&self.platform, &self.channel, &self.creative, self.bid)
    }

    /// Reject negative or non-finite bids and empty identity fields.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.bid.is_finite() || self.bid < 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "arm bid must be a non-negative finite number, got {}",
                self.bid
            )));
        }
        for (field, value) in [
            ("platform", &self.platform),
            ("channel", &self.channel),
            ("creative", &self.creative),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::ValidationFailed(format!(
                    "arm {field} cannot be empty"
                )));
            }
            if value.contains(':') {
                return Err(DomainError::ValidationFailed(format!(
                    "arm {field} cannot contain ':' (reserved as the key separator)"
                )));
            }
        }
        Ok(())
    }
}
