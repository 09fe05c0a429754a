//! Metric ingestor.
//!
//! Both intake paths (platform polling and signed webhooks) feed this
//! single pipeline: static validation, anomaly screening against a
//! rolling 7-day baseline, idempotent persistence, and batched posterior
//! updates. Poll rows are authoritative for posteriors; webhook rows are
//! hints that trigger an out-of-cycle update only when they deviate
//! enough from the current belief, and their contribution is retracted
//! when the authoritative poll row for the same window arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use statrs::statistics::Statistics;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AllocationChange, Arm, ChangeReason, Metric, MetricQuality, MetricSource, PosteriorUpdate,
};
use crate::domain::ports::{CampaignRepository, InsertOutcome};
use crate::services::store::{PosteriorStore, StoreError};

/// Rolling anomaly baseline window.
const BASELINE_DAYS: i64 = 7;
/// Minimum baseline samples before the z-screen activates.
const BASELINE_MIN_SAMPLES: usize = 5;

/// Ingest failures.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Rejected input; no state change.
    #[error("metric validation failed: {0}")]
    Validation(String),

    /// Intake queue saturated; the caller should shed load (503).
    #[error("ingest queue full for campaign {0}")]
    QueueFull(i64),

    /// No arm matches the submitted key.
    #[error("unknown arm key '{0}'")]
    UnknownArm(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a submitted metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Queued for the campaign's next decision cycle.
    Queued,
    /// Webhook hint deviated enough to update the posterior immediately.
    OutOfCycle,
    /// Row already stored; nothing changed.
    Duplicate,
    /// Persisted but flagged suspect; excluded from posterior updates.
    Flagged,
}

/// Ingest pipeline tunables, resolved from engine config.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub anomaly_z: f64,
    pub roas_max: f64,
    pub max_trials_per_cycle: u64,
    pub webhook_delta_threshold: f64,
    pub pending_queue_capacity: usize,
    /// Permit revenue rows with zero cost (view-through attribution).
    pub allow_free_revenue: bool,
}

/// Monotonic ingest counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted: AtomicU64,
    pub duplicates: AtomicU64,
    pub rejected: AtomicU64,
    pub flagged: AtomicU64,
    pub webhook_dropped: AtomicU64,
    pub hints_applied: AtomicU64,
    pub hints_retracted: AtomicU64,
}

/// Arm lookup shared by webhook decoding and the pollers.
#[derive(Debug, Default, Clone)]
pub struct ArmIndex {
    by_key: HashMap<String, Arm>,
    by_id: HashMap<i64, Arm>,
}

impl ArmIndex {
    /// Load every arm of every campaign.
    pub async fn load(campaigns: &Arc<dyn CampaignRepository>) -> DomainResult<Self> {
        let mut by_key = HashMap::new();
        let mut by_id = HashMap::new();
        for campaign in campaigns.list(None).await? {
            for arm in campaigns.list_arms(campaign.id).await? {
                by_key.insert(arm.arm_key(), arm.clone());
                by_id.insert(arm.id, arm);
            }
        }
        Ok(Self { by_key, by_id })
    }

    pub fn resolve_key(&self, arm_key: &str) -> Option<&Arm> {
        self.by_key.get(arm_key)
    }

    pub fn get(&self, arm_id: i64) -> Option<&Arm> {
        self.by_id.get(&arm_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Per-campaign pending intake.
#[derive(Debug, Default)]
struct PendingQueue {
    /// Poll results: never dropped.
    polls: VecDeque<Metric>,
    /// Webhook events: oldest dropped first under pressure.
    webhooks: VecDeque<Metric>,
}

/// The ingest pipeline.
pub struct MetricIngestor {
    store: Arc<PosteriorStore>,
    config: IngestConfig,
    queues: Mutex<HashMap<i64, PendingQueue>>,
    /// Webhook contributions already folded into posteriors, keyed by
    /// `(arm_id, window ts)`; retracted when the poll row lands.
    hints: Mutex<HashMap<(i64, DateTime<Utc>), PosteriorUpdate>>,
    stats: IngestStats,
}

/// Result of processing one metric at apply time.
enum Processed {
    Apply {
        update: PosteriorUpdate,
        retraction: Option<PosteriorUpdate>,
    },
    /// Idempotency key already present; nothing changed.
    Duplicate,
    /// Persisted as suspect; excluded from the posterior.
    Flagged,
    /// Webhook row stored for the record; polls remain the posterior's
    /// source of truth.
    PersistedOnly,
}

impl MetricIngestor {
    pub fn new(store: Arc<PosteriorStore>, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            queues: Mutex::new(HashMap::new()),
            hints: Mutex::new(HashMap::new()),
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Submit one metric into the pipeline.
    ///
    /// Polls are validated and queued for the next cycle (never dropped).
    /// Webhooks are additionally screened against the current posterior:
    /// a large-enough deviation triggers an immediate out-of-cycle
    /// posterior update.
    pub async fn submit(&self, campaign_id: i64, metric: Metric) -> Result<Submitted, IngestError> {
        if let Err(e) = validate_metric(&metric, &self.config) {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        match metric.source {
            MetricSource::Poll | MetricSource::Backfill => {
                self.enqueue_poll(campaign_id, metric).await;
                Ok(Submitted::Queued)
            }
            MetricSource::Webhook => self.submit_webhook(campaign_id, metric).await,
        }
    }

    async fn enqueue_poll(&self, campaign_id: i64, metric: Metric) {
        let mut queues = self.queues.lock().await;
        queues.entry(campaign_id).or_default().polls.push_back(metric);
    }

    async fn submit_webhook(
        &self,
        campaign_id: i64,
        metric: Metric,
    ) -> Result<Submitted, IngestError> {
        // Out-of-cycle screen: compare the window's ROAS to the arm's
        // current trial-weighted mean.
        let posterior = self.store.get_posterior(metric.arm_id).await?;
        let mean = posterior.as_ref().map_or(0.0, |p| p.mean_reward());
        let deviates = (metric.roas() - mean).abs() > self.config.webhook_delta_threshold;

        if deviates {
            return self.process_and_apply(metric, Utc::now()).await;
        }

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(campaign_id).or_default();
        if queue.webhooks.len() >= self.config.pending_queue_capacity {
            // Hints are expendable: shed the oldest first, and only
            // refuse outright when shedding cannot keep up.
            if queue.webhooks.len() >= self.config.pending_queue_capacity * 4 {
                return Err(IngestError::QueueFull(campaign_id));
            }
            queue.webhooks.pop_front();
            self.stats.webhook_dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.webhooks.push_back(metric);
        Ok(Submitted::Queued)
    }

    /// Non-blocking bounded drain of a campaign's pending metrics, polls
    /// first.
    pub async fn drain_pending_for(&self, campaign_id: i64, max: usize) -> Vec<Metric> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(&campaign_id) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(max.min(queue.polls.len() + queue.webhooks.len()));
        while out.len() < max {
            if let Some(m) = queue.polls.pop_front() {
                out.push(m);
            } else {
                break;
            }
        }
        while out.len() < max {
            if let Some(m) = queue.webhooks.pop_front() {
                out.push(m);
            } else {
                break;
            }
        }
        out
    }

    /// Apply a drained batch: persist each row, then fold the surviving
    /// updates into posteriors, one locked write per arm.
    pub async fn apply_batch(
        &self,
        metrics: Vec<Metric>,
        now: DateTime<Utc>,
    ) -> Result<usize, IngestError> {
        let mut merged: HashMap<i64, PosteriorUpdate> = HashMap::new();
        let mut retractions: Vec<(i64, PosteriorUpdate)> = Vec::new();

        for metric in metrics {
            let arm_id = metric.arm_id;
            match self.process(metric, false).await? {
                Processed::Apply { update, retraction } => {
                    if let Some(r) = retraction {
                        retractions.push((arm_id, r));
                    }
                    merged.entry(arm_id).or_default().merge(&update);
                }
                Processed::Duplicate | Processed::Flagged | Processed::PersistedOnly => {}
            }
        }

        for (arm_id, retraction) in retractions {
            self.fold_retraction(arm_id, &retraction, now).await?;
        }

        let mut applied = 0;
        // Deterministic arm order keeps lock acquisition stable.
        let mut arm_ids: Vec<i64> = merged.keys().copied().collect();
        arm_ids.sort_unstable();
        for arm_id in arm_ids {
            let update = &merged[&arm_id];
            if update.is_empty() {
                continue;
            }
            self.fold_update(arm_id, update, now).await?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Fold one merged batch into an arm's posterior.
    ///
    /// A lock-wait timeout is retried once; `update_posterior` re-reads
    /// the last committed row under the lock, so the retry runs against
    /// a fresh snapshot. A second timeout surfaces to the caller, which
    /// escalates the campaign. Arms folded before the failure keep their
    /// updates; their metric rows are already durable, so nothing is
    /// double-counted and nothing is silently dropped.
    async fn fold_update(
        &self,
        arm_id: i64,
        update: &PosteriorUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        match self.store.update_posterior(arm_id, update, now).await {
            Ok(_) => Ok(()),
            Err(StoreError::LockTimeout { .. }) => {
                warn!(arm_id, "lock wait timed out; retrying posterior fold once");
                self.store.update_posterior(arm_id, update, now).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reverse a superseded webhook hint, with the same retry-once rule
    /// as `fold_update`.
    async fn fold_retraction(
        &self,
        arm_id: i64,
        retraction: &PosteriorUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        match self.store.retract_posterior(arm_id, retraction, now).await {
            Ok(_) => {}
            Err(StoreError::LockTimeout { .. }) => {
                warn!(arm_id, "lock wait timed out; retrying hint retraction once");
                self.store.retract_posterior(arm_id, retraction, now).await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.stats.hints_retracted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Validate (anomaly screen), persist, and classify one metric.
    ///
    /// `fold_webhook` controls whether a webhook row's delta may enter
    /// the posterior (the out-of-cycle path); drained webhooks are
    /// persisted only.
    async fn process(&self, mut metric: Metric, fold_webhook: bool) -> Result<Processed, IngestError> {
        metric.quality = self.screen_anomaly(&metric).await?;

        let outcome = self.store.record_metric(&metric).await?;
        if outcome == InsertOutcome::DuplicateIgnored {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(Processed::Duplicate);
        }

        if metric.quality == MetricQuality::Suspect {
            self.stats.flagged.fetch_add(1, Ordering::Relaxed);
            self.flag_suspect(&metric).await?;
            return Ok(Processed::Flagged);
        }

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        let update = PosteriorUpdate::from_metric(&metric, self.config.max_trials_per_cycle);

        match metric.source {
            MetricSource::Poll | MetricSource::Backfill => {
                // The poll row is authoritative: any webhook contribution
                // for the same window is withdrawn before it lands.
                let retraction = self
                    .hints
                    .lock()
                    .await
                    .remove(&(metric.arm_id, metric.ts));
                Ok(Processed::Apply { update, retraction })
            }
            MetricSource::Webhook if fold_webhook => {
                self.hints
                    .lock()
                    .await
                    .insert((metric.arm_id, metric.ts), update);
                self.stats.hints_applied.fetch_add(1, Ordering::Relaxed);
                Ok(Processed::Apply {
                    update,
                    retraction: None,
                })
            }
            MetricSource::Webhook => Ok(Processed::PersistedOnly),
        }
    }

    /// Process one metric and immediately fold it into the posterior
    /// (the webhook out-of-cycle path).
    async fn process_and_apply(
        &self,
        metric: Metric,
        now: DateTime<Utc>,
    ) -> Result<Submitted, IngestError> {
        let arm_id = metric.arm_id;
        match self.process(metric, true).await? {
            Processed::Apply { update, retraction } => {
                if let Some(r) = retraction {
                    self.fold_retraction(arm_id, &r, now).await?;
                }
                self.fold_update(arm_id, &update, now).await?;
                debug!(arm_id, "out-of-cycle posterior update from webhook hint");
                Ok(Submitted::OutOfCycle)
            }
            Processed::Duplicate => Ok(Submitted::Duplicate),
            Processed::Flagged => Ok(Submitted::Flagged),
            Processed::PersistedOnly => Ok(Submitted::Queued),
        }
    }

    /// Data-quality screen: plausibility bound on ROAS plus a rolling
    /// 7-day z-score. Flags, never drops.
    async fn screen_anomaly(&self, metric: &Metric) -> Result<MetricQuality, IngestError> {
        if metric.cost <= 0.0 {
            return Ok(MetricQuality::Ok);
        }

        if metric.roas() > self.config.roas_max {
            warn!(
                arm_id = metric.arm_id,
                roas = metric.roas(),
                "metric flagged suspect: ROAS outside plausible bounds"
            );
            return Ok(MetricQuality::Suspect);
        }

        let since = metric.ts - ChronoDuration::days(BASELINE_DAYS);
        let history = self
            .store
            .metrics()
            .recent_roas(metric.arm_id, since)
            .await
            .map_err(StoreError::from)?;
        if history.len() < BASELINE_MIN_SAMPLES {
            return Ok(MetricQuality::Ok);
        }

        let mean = history.iter().mean();
        let std_dev = history.iter().std_dev();
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Ok(MetricQuality::Ok);
        }

        let z = (metric.roas() - mean) / std_dev;
        if z.abs() > self.config.anomaly_z {
            warn!(
                arm_id = metric.arm_id,
                roas = metric.roas(),
                z,
                "metric flagged suspect by anomaly screen"
            );
            return Ok(MetricQuality::Suspect);
        }
        Ok(MetricQuality::Ok)
    }

    /// Record the suspect row in the change log so the flag is visible
    /// downstream.
    async fn flag_suspect(&self, metric: &Metric) -> Result<(), IngestError> {
        let campaign_id = match self.store.campaigns().get_arm(metric.arm_id).await {
            Ok(Some(arm)) => arm.campaign_id,
            _ => return Ok(()),
        };
        let change = AllocationChange::event(
            campaign_id,
            metric.arm_id,
            metric.ts,
            0.0,
            ChangeReason::AnomalyFlag,
            serde_json::json!({
                "source": metric.source.as_str(),
                "roas": metric.roas(),
                "cost": metric.cost,
                "revenue": metric.revenue,
            }),
        );
        self.store.append_change(&change).await?;
        Ok(())
    }
}

/// Static validation: required fields and type/range checks. Failures
/// here are rejections (no state change); plausibility problems are
/// handled by the quality screen instead, which flags rather than drops.
pub fn validate_metric(metric: &Metric, config: &IngestConfig) -> Result<(), IngestError> {
    if metric.arm_id <= 0 {
        return Err(IngestError::Validation("arm_id is required".to_string()));
    }
    if !metric.cost.is_finite() || metric.cost < 0.0 {
        return Err(IngestError::Validation(format!(
            "cost must be non-negative, got {}",
            metric.cost
        )));
    }
    if !metric.revenue.is_finite() || metric.revenue < 0.0 {
        return Err(IngestError::Validation(format!(
            "revenue must be non-negative, got {}",
            metric.revenue
        )));
    }
    if metric.clicks > metric.impressions {
        return Err(IngestError::Validation(format!(
            "clicks ({}) cannot exceed impressions ({})",
            metric.clicks, metric.impressions
        )));
    }
    if metric.conversions > metric.clicks {
        return Err(IngestError::Validation(format!(
            "conversions ({}) cannot exceed clicks ({})",
            metric.conversions, metric.clicks
        )));
    }
    if metric.cost == 0.0 && metric.revenue > 0.0 && !config.allow_free_revenue {
        return Err(IngestError::Validation(
            "revenue reported against zero cost".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(clicks: u64, conversions: u64, cost: f64, revenue: f64) -> Metric {
        Metric {
            arm_id: 1,
            ts: Utc::now(),
            source: MetricSource::Poll,
            impressions: clicks.max(1) * 10,
            clicks,
            conversions,
            cost,
            revenue,
            quality: MetricQuality::Ok,
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            anomaly_z: 3.0,
            roas_max: 100.0,
            max_trials_per_cycle: 10_000,
            webhook_delta_threshold: 0.5,
            pending_queue_capacity: 8,
            allow_free_revenue: false,
        }
    }

    #[test]
    fn test_validate_accepts_normal_row() {
        assert!(validate_metric(&metric(100, 5, 50.0, 100.0), &config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_counts_inversion() {
        let mut m = metric(100, 5, 50.0, 100.0);
        m.impressions = 10;
        assert!(validate_metric(&m, &config()).is_err());

        let mut m = metric(100, 5, 50.0, 100.0);
        m.conversions = 200;
        assert!(validate_metric(&m, &config()).is_err());
    }

    #[test]
    fn test_validate_rejects_free_revenue() {
        assert!(validate_metric(&metric(100, 5, 0.0, 10.0), &config()).is_err());
    }

    #[test]
    fn test_validate_allows_free_revenue_when_configured() {
        let mut cfg = config();
        cfg.allow_free_revenue = true;
        assert!(validate_metric(&metric(100, 5, 0.0, 10.0), &cfg).is_ok());
    }

    #[test]
    fn test_implausible_roas_is_not_a_rejection() {
        // Implausible ROAS is a data-quality flag, not a validation
        // error; the row survives static validation and is flagged at
        // screen time.
        assert!(validate_metric(&metric(100, 5, 1.0, 500.0), &config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_amounts() {
        assert!(validate_metric(&metric(100, 5, -1.0, 0.0), &config()).is_err());
        assert!(validate_metric(&metric(100, 5, 1.0, -2.0), &config()).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_arm() {
        let mut m = metric(100, 5, 50.0, 100.0);
        m.arm_id = 0;
        assert!(validate_metric(&m, &config()).is_err());
    }
}
