//! Ad platform capability.
//!
//! Each vendor integration implements this interface; the engine never
//! sees vendor SDK types. All operations are idempotent so the engine can
//! retry freely: `fetch_metrics` by construction, `set_bid` by
//! `(arm binding, bid)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::models::Metric;

/// How the engine addresses one arm on a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmBinding {
    pub arm_id: i64,
    pub arm_key: String,
}

/// A campaign as the platform reports it, for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCampaign {
    pub external_id: String,
    pub name: String,
}

/// Platform call failure, split by retry semantics.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Network, 5xx, 408/429: retried with backoff.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Other 4xx or schema mismatch: recorded and abandoned for the cycle.
    #[error("permanent platform error: {0}")]
    Permanent(String),

    /// Deadline exceeded; treated as transient.
    #[error("platform call deadline exceeded")]
    Deadline,
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Deadline)
    }
}

/// Pluggable ad-platform interface.
#[async_trait]
pub trait AdPlatform: Send + Sync {
    /// Platform name as configured (and as used in webhook paths).
    fn name(&self) -> &str;

    /// Pull metric rows for the given arms since a watermark.
    async fn fetch_metrics(
        &self,
        account_id: &str,
        bindings: &[ArmBinding],
        since: DateTime<Utc>,
    ) -> Result<Vec<Metric>, PlatformError>;

    /// Apply a bid. Idempotent by `(binding, bid)`.
    async fn set_bid(&self, binding: &ArmBinding, bid: f64) -> Result<(), PlatformError>;

    /// Discover campaigns visible to the account.
    async fn list_campaigns(&self, account_id: &str)
        -> Result<Vec<RemoteCampaign>, PlatformError>;
}
