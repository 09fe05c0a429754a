//! Generic REST ad-platform adapter.
//!
//! Speaks a plain JSON-over-HTTP shape that in-house platform gateways
//! expose: a metrics query endpoint, an idempotent bid endpoint, and a
//! campaign listing. Vendor-specific SDK shims live outside this crate;
//! they implement the same `AdPlatform` capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::models::{Metric, MetricQuality, MetricSource};
use crate::domain::ports::{AdPlatform, ArmBinding, PlatformError, RemoteCampaign};

/// Request body for the metrics query endpoint.
#[derive(Debug, Serialize)]
struct MetricsQuery<'a> {
    account_id: &'a str,
    arm_keys: Vec<&'a str>,
    since: DateTime<Utc>,
}

/// One metric row as the gateway reports it.
#[derive(Debug, Deserialize)]
struct MetricsRow {
    arm_key: String,
    ts: DateTime<Utc>,
    #[serde(default)]
    impressions: u64,
    #[serde(default)]
    clicks: u64,
    #[serde(default)]
    conversions: u64,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    revenue: f64,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    rows: Vec<MetricsRow>,
}

#[derive(Debug, Serialize)]
struct BidUpdate<'a> {
    account_id: &'a str,
    arm_key: &'a str,
    bid: f64,
}

#[derive(Debug, Deserialize)]
struct CampaignRow {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CampaignsResponse {
    campaigns: Vec<CampaignRow>,
}

/// REST implementation of the `AdPlatform` capability.
pub struct RestPlatform {
    name: String,
    base_url: String,
    account_id: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestPlatform {
    pub fn new(
        name: String,
        base_url: String,
        account_id: String,
        api_key: String,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("adbandit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Permanent(format!("http client build failed: {e}")))?;
        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            api_key,
            client,
        })
    }

    fn classify_status(status: StatusCode) -> Option<PlatformError> {
        if status.is_success() {
            return None;
        }
        let retriable = status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS;
        Some(if retriable {
            PlatformError::Transient(format!("HTTP {status}"))
        } else {
            PlatformError::Permanent(format!("HTTP {status}"))
        })
    }

    fn classify_request_error(e: &reqwest::Error) -> PlatformError {
        if e.is_timeout() {
            PlatformError::Deadline
        } else if e.is_connect() || e.is_request() {
            PlatformError::Transient(e.to_string())
        } else {
            PlatformError::Permanent(e.to_string())
        }
    }
}

#[async_trait]
impl AdPlatform for RestPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_metrics(
        &self,
        account_id: &str,
        bindings: &[ArmBinding],
        since: DateTime<Utc>,
    ) -> Result<Vec<Metric>, PlatformError> {
        let query = MetricsQuery {
            account_id,
            arm_keys: bindings.iter().map(|b| b.arm_key.as_str()).collect(),
            since,
        };

        let response = self
            .client
            .post(format!("{}/v1/metrics/query", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&query)
            .send()
            .await
            .map_err(|e| Self::classify_request_error(&e))?;

        if let Some(err) = Self::classify_status(response.status()) {
            return Err(err);
        }

        let body: MetricsResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Permanent(format!("metrics schema mismatch: {e}")))?;

        // Rows come back keyed; map onto bound arms, dropping anything
        // the engine did not ask for.
        let mut metrics = Vec::with_capacity(body.rows.len());
        for row in body.rows {
            let Some(binding) = bindings.iter().find(|b| b.arm_key == row.arm_key) else {
                debug!(platform = %self.name, arm_key = %row.arm_key, "unrequested row dropped");
                continue;
            };
            metrics.push(Metric {
                arm_id: binding.arm_id,
                ts: row.ts,
                source: MetricSource::Poll,
                impressions: row.impressions,
                clicks: row.clicks,
                conversions: row.conversions,
                cost: row.cost,
                revenue: row.revenue,
                quality: MetricQuality::Ok,
            });
        }
        Ok(metrics)
    }

    async fn set_bid(&self, binding: &ArmBinding, bid: f64) -> Result<(), PlatformError> {
        let update = BidUpdate {
            account_id: &self.account_id,
            arm_key: &binding.arm_key,
            bid,
        };

        let response = self
            .client
            .put(format!("{}/v1/bids", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&update)
            .send()
            .await
            .map_err(|e| Self::classify_request_error(&e))?;

        match Self::classify_status(response.status()) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    async fn list_campaigns(
        &self,
        account_id: &str,
    ) -> Result<Vec<RemoteCampaign>, PlatformError> {
        let response = self
            .client
            .get(format!("{}/v1/campaigns", self.base_url))
            .query(&[("account_id", account_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::classify_request_error(&e))?;

        if let Some(err) = Self::classify_status(response.status()) {
            return Err(err);
        }

        let body: CampaignsResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Permanent(format!("campaigns schema mismatch: {e}")))?;

        Ok(body
            .campaigns
            .into_iter()
            .map(|c| RemoteCampaign {
                external_id: c.id,
                name: c.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RestPlatform::classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            RestPlatform::classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(PlatformError::Transient(_))
        ));
        assert!(matches!(
            RestPlatform::classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(PlatformError::Transient(_))
        ));
        assert!(matches!(
            RestPlatform::classify_status(StatusCode::REQUEST_TIMEOUT),
            Some(PlatformError::Transient(_))
        ));
        assert!(matches!(
            RestPlatform::classify_status(StatusCode::FORBIDDEN),
            Some(PlatformError::Permanent(_))
        ));
        assert!(matches!(
            RestPlatform::classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            Some(PlatformError::Permanent(_))
        ));
    }
}
