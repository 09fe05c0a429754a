//! Metric repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Metric, MetricSource};

/// Result of an idempotent metric insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The `(arm_id, ts, source)` key already exists; the row was left
    /// untouched.
    DuplicateIgnored,
}

/// Repository interface for metric time series.
#[async_trait]
pub trait MetricRepository: Send + Sync {
    /// Idempotent insert keyed on `(arm_id, ts, source)`.
    async fn record(&self, metric: &Metric) -> DomainResult<InsertOutcome>;

    /// Time-range scan for one arm, ascending by timestamp.
    async fn range(
        &self,
        arm_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Metric>>;

    /// ROAS observations for one arm since a cutoff (anomaly baseline).
    /// Suspect rows are excluded from the baseline.
    async fn recent_roas(&self, arm_id: i64, since: DateTime<Utc>) -> DomainResult<Vec<f64>>;

    /// Latest stored timestamp for a campaign's arms from one source;
    /// the poll watermark.
    async fn latest_ts(
        &self,
        campaign_id: i64,
        source: MetricSource,
    ) -> DomainResult<Option<DateTime<Utc>>>;
}
