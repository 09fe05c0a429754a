//! Canonical metric row.
//!
//! Raw platform payloads are parsed into platform-specific records and
//! mapped into this shape before they touch the core. Derived rates
//! (CTR, CVR, ROAS) are computed on demand, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a metric row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// Scheduled pull from the platform API. Authoritative for posteriors.
    Poll,
    /// Pushed by the platform in near-real-time. A hint, not authority.
    Webhook,
    /// Historical import.
    Backfill,
}

impl MetricSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Webhook => "webhook",
            Self::Backfill => "backfill",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "poll" => Some(Self::Poll),
            "webhook" => Some(Self::Webhook),
            "backfill" => Some(Self::Backfill),
            _ => None,
        }
    }
}

/// Data-quality flag attached at ingest time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricQuality {
    Ok,
    /// Failed the anomaly screen; persisted but excluded from posterior
    /// updates until an operator accepts it.
    Suspect,
}

impl MetricQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Suspect => "suspect",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ok" => Some(Self::Ok),
            "suspect" => Some(Self::Suspect),
            _ => None,
        }
    }
}

/// One measurement window for one arm.
///
/// `(arm_id, ts, source)` is the idempotency key; re-ingesting the same
/// row is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub arm_id: i64,
    pub ts: DateTime<Utc>,
    pub source: MetricSource,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,
    pub quality: MetricQuality,
}

impl Metric {
    /// Click-through rate; zero when no impressions.
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.clicks as f64 / self.impressions as f64
        }
    }

    /// Conversion rate per click; zero when no clicks.
    pub fn cvr(&self) -> f64 {
        if self.clicks == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.conversions as f64 / self.clicks as f64
        }
    }

    /// Return on ad spend for the window; zero when nothing was spent.
    pub fn roas(&self) -> f64 {
        if self.cost <= 0.0 {
            return 0.0;
        }
        self.revenue / self.cost
    }
}
