//! Platform metric poller.
//!
//! One poller per credentialed platform. Each pass walks the Active
//! campaigns with arms on the platform and pulls fresh metric rows since
//! the last poll watermark. Calls are paced by a per-platform token
//! bucket, so same-platform fetches serialize behind the limiter while
//! different platforms proceed in parallel. Transient failures retry
//! with capped exponential backoff; permanent failures are recorded in
//! the change log and abandoned for the pass.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::domain::models::{
    AllocationChange, Campaign, CampaignStatus, ChangeReason, MetricSource, PlatformConfig,
    RetryConfig,
};
use crate::domain::ports::{AdPlatform, ArmBinding, PlatformError};
use crate::services::ingest::MetricIngestor;
use crate::services::store::PosteriorStore;

/// Handle to stop a running poller.
pub struct PollerHandle {
    stop_flag: Arc<AtomicBool>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Poller for one ad platform.
pub struct PlatformPoller {
    platform: Arc<dyn AdPlatform>,
    account_id: String,
    store: Arc<PosteriorStore>,
    ingestor: Arc<MetricIngestor>,
    limiter: Arc<DefaultDirectRateLimiter>,
    call_semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    poll_interval: Duration,
    fetch_timeout: Duration,
    stop_flag: Arc<AtomicBool>,
}

impl PlatformPoller {
    pub fn new(
        platform: Arc<dyn AdPlatform>,
        config: &PlatformConfig,
        retry: RetryConfig,
        fetch_timeout: Duration,
        store: Arc<PosteriorStore>,
        ingestor: Arc<MetricIngestor>,
    ) -> Self {
        let rate = NonZeroU32::new(config.poll_rate_per_sec.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            platform,
            account_id: config.account_id.clone(),
            store,
            ingestor,
            limiter: Arc::new(RateLimiter::direct(quota)),
            call_semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls.max(1))),
            retry,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1_000)),
            fetch_timeout,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            stop_flag: self.stop_flag.clone(),
        }
    }

    /// Run the poll loop until stopped.
    pub async fn run(self) {
        info!(platform = self.platform.name(), "platform poller started");
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = self.poll_once().await {
                warn!(platform = self.platform.name(), error = %e, "poll pass failed");
            }
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
        }
        info!(platform = self.platform.name(), "platform poller stopped");
    }

    /// One full pass over Active campaigns with arms on this platform.
    pub async fn poll_once(&self) -> Result<(), crate::services::store::StoreError> {
        let campaigns = self
            .store
            .campaigns()
            .list(Some(CampaignStatus::Active))
            .await?;

        for campaign in campaigns {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            self.poll_campaign(&campaign).await?;
        }
        Ok(())
    }

    async fn poll_campaign(
        &self,
        campaign: &Campaign,
    ) -> Result<(), crate::services::store::StoreError> {
        let arms = self.store.campaigns().list_arms(campaign.id).await?;
        let bindings: Vec<ArmBinding> = arms
            .iter()
            .filter(|a| !a.disabled && a.platform == self.platform.name())
            .map(|a| ArmBinding {
                arm_id: a.id,
                arm_key: a.arm_key(),
            })
            .collect();
        if bindings.is_empty() {
            return Ok(());
        }

        let since = self
            .store
            .metrics()
            .latest_ts(campaign.id, MetricSource::Poll)
            .await?
            .unwrap_or(campaign.start);

        match self.fetch_with_retry(&bindings, since).await {
            Ok(metrics) => {
                debug!(
                    platform = self.platform.name(),
                    campaign_id = campaign.id,
                    rows = metrics.len(),
                    "poll fetched metrics"
                );
                for metric in metrics {
                    match self.ingestor.submit(campaign.id, metric).await {
                        Ok(_) => {}
                        Err(e) => {
                            warn!(campaign_id = campaign.id, error = %e, "poll row rejected");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    platform = self.platform.name(),
                    campaign_id = campaign.id,
                    error = %e,
                    "poll abandoned for this cycle"
                );
                self.record_ingest_error(campaign.id, bindings[0].arm_id, &e)
                    .await?;
            }
        }
        Ok(())
    }

    /// Fetch with deadline, rate limiting, and capped exponential
    /// backoff. Transient errors (network, 5xx, 408/429, deadline) retry
    /// up to the configured attempt budget; anything else is permanent.
    async fn fetch_with_retry(
        &self,
        bindings: &[ArmBinding],
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<crate::domain::models::Metric>, PlatformError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry.initial_backoff_ms),
            multiplier: self.retry.multiplier,
            max_interval: Duration::from_millis(self.retry.max_backoff_ms),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        let attempts = AtomicU32::new(0);
        let max_retries = self.retry.max_retries;

        backoff::future::retry(policy, || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                let _permit = self
                    .call_semaphore
                    .acquire()
                    .await
                    .map_err(|_| backoff::Error::permanent(PlatformError::Permanent(
                        "call semaphore closed".to_string(),
                    )))?;
                self.limiter.until_ready().await;

                let result = tokio::time::timeout(
                    self.fetch_timeout,
                    self.platform.fetch_metrics(&self.account_id, bindings, since),
                )
                .await
                .unwrap_or(Err(PlatformError::Deadline));

                match result {
                    Ok(metrics) => Ok(metrics),
                    Err(e) if e.is_transient() && attempt < max_retries => {
                        debug!(
                            platform = self.platform.name(),
                            attempt,
                            error = %e,
                            "transient fetch failure, backing off"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    /// Permanent ingest failures surface as change-log rows so the
    /// dashboard can explain the gap.
    async fn record_ingest_error(
        &self,
        campaign_id: i64,
        arm_id: i64,
        error: &PlatformError,
    ) -> Result<(), crate::services::store::StoreError> {
        let change = AllocationChange::event(
            campaign_id,
            arm_id,
            Utc::now(),
            0.0,
            ChangeReason::IngestError,
            serde_json::json!({
                "platform": self.platform.name(),
                "error": error.to_string(),
            }),
        );
        self.store.append_change(&change).await?;
        Ok(())
    }
}
