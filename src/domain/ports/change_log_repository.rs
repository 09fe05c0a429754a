//! Change log repository port.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::AllocationChange;

/// Append-only allocation change stream, indexed by `(campaign_id, ts)`.
#[async_trait]
pub trait ChangeLogRepository: Send + Sync {
    /// Append one change; returns its assigned row id.
    async fn append(&self, change: &AllocationChange) -> DomainResult<i64>;

    /// Range query for explanation and the read API, ascending by
    /// timestamp.
    async fn range(
        &self,
        campaign_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<AllocationChange>>;

    /// Most recent recorded allocation per arm for a campaign. Arms with
    /// no change yet are absent.
    async fn latest_allocations(&self, campaign_id: i64) -> DomainResult<HashMap<i64, f64>>;

    /// Delete rows older than the cutoff; returns how many were removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
