//! Posterior store: the durable state facade.
//!
//! Owns crash-safe persistence of campaigns, posteriors, metrics, the
//! change log, and the recovery journal, behind a single seam the rest of
//! the engine talks to. Posterior writes are read-modify-write under a
//! per-arm async lock with a bounded wait; snapshots are copy-on-read of
//! committed rows and never block writers. On restart, state is rebuilt
//! from the last committed posterior row per arm, never by replaying the
//! metric log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AllocationChange, Arm, ArmPosterior, Campaign, CampaignStatus, Metric, PosteriorUpdate,
};
use crate::domain::ports::{
    CampaignRepository, ChangeLogRepository, InsertOutcome, IntendedAllocation,
    JournalRepository, MetricRepository, PosteriorRepository,
};

/// Store failures. Lock waits are retried once by the caller with a
/// fresh snapshot; a second failure escalates the campaign to Errored.
/// Write timeouts and database errors surface unconditionally; the
/// store never silently drops a write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock wait timed out for arm {arm_id}")]
    LockTimeout { arm_id: i64 },

    #[error("durable write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Deadlines for store operations.
#[derive(Debug, Clone, Copy)]
pub struct StoreTimeouts {
    /// Per-arm lock wait bound.
    pub lock: Duration,
    /// Durable write bound.
    pub write: Duration,
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        Self {
            lock: Duration::from_secs(5),
            write: Duration::from_secs(5),
        }
    }
}

/// Consistent view of one campaign at a point in time.
#[derive(Debug, Clone)]
pub struct CampaignSnapshot {
    pub campaign: Campaign,
    pub arms: Vec<Arm>,
    pub posteriors: HashMap<i64, ArmPosterior>,
    /// Cumulative spend across arms (the budget invariant's left side).
    pub spent: f64,
    /// Last applied allocation per arm, from the change log.
    pub old_allocations: HashMap<i64, f64>,
}

/// Durable state facade over the repositories.
pub struct PosteriorStore {
    campaigns: Arc<dyn CampaignRepository>,
    metrics: Arc<dyn MetricRepository>,
    posteriors: Arc<dyn PosteriorRepository>,
    changes: Arc<dyn ChangeLogRepository>,
    journal: Arc<dyn JournalRepository>,
    timeouts: StoreTimeouts,
    /// Per-arm write locks, created lazily.
    arm_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    /// Monotonicity watermark for the change log.
    last_change_ts: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl PosteriorStore {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        metrics: Arc<dyn MetricRepository>,
        posteriors: Arc<dyn PosteriorRepository>,
        changes: Arc<dyn ChangeLogRepository>,
        journal: Arc<dyn JournalRepository>,
        timeouts: StoreTimeouts,
    ) -> Self {
        Self {
            campaigns,
            metrics,
            posteriors,
            changes,
            journal,
            timeouts,
            arm_locks: Mutex::new(HashMap::new()),
            last_change_ts: Mutex::new(HashMap::new()),
        }
    }

    pub fn campaigns(&self) -> &Arc<dyn CampaignRepository> {
        &self.campaigns
    }

    pub fn metrics(&self) -> &Arc<dyn MetricRepository> {
        &self.metrics
    }

    pub fn changes(&self) -> &Arc<dyn ChangeLogRepository> {
        &self.changes
    }

    /// Atomic snapshot of a campaign with arms, posteriors, spend, and
    /// last applied allocations.
    pub async fn load_campaign(&self, id: i64) -> StoreResult<CampaignSnapshot> {
        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(DomainError::CampaignNotFound(id))?;
        let arms = self.campaigns.list_arms(id).await?;
        let posterior_rows = self.posteriors.for_campaign(id).await?;
        let spent = self.posteriors.campaign_spend(id).await?;
        let old_allocations = self.changes.latest_allocations(id).await?;

        let posteriors = posterior_rows.into_iter().map(|p| (p.arm_id, p)).collect();
        Ok(CampaignSnapshot {
            campaign,
            arms,
            posteriors,
            spent,
            old_allocations,
        })
    }

    /// Alias making call sites read like the contract: readers take
    /// committed rows, writers are never blocked.
    pub async fn snapshot(&self, campaign_id: i64) -> StoreResult<CampaignSnapshot> {
        self.load_campaign(campaign_id).await
    }

    /// Idempotent metric insert keyed on `(arm_id, ts, source)`.
    pub async fn record_metric(&self, metric: &Metric) -> StoreResult<InsertOutcome> {
        let outcome = tokio::time::timeout(self.timeouts.write, self.metrics.record(metric))
            .await
            .map_err(|_| StoreError::WriteTimeout(self.timeouts.write))??;
        Ok(outcome)
    }

    /// Apply an observation batch to one arm's posterior under its lock.
    ///
    /// Read-modify-write: the last committed row (or the prior) is loaded,
    /// the delta applied, and the new row upserted, all while holding the
    /// per-arm lock so concurrent updates linearize.
    pub async fn update_posterior(
        &self,
        arm_id: i64,
        update: &PosteriorUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<ArmPosterior> {
        self.mutate_posterior(arm_id, |p| p.apply(update, now)).await
    }

    /// Reverse a previously applied batch (webhook hint superseded by an
    /// authoritative poll row).
    pub async fn retract_posterior(
        &self,
        arm_id: i64,
        update: &PosteriorUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<ArmPosterior> {
        self.mutate_posterior(arm_id, |p| p.retract(update, now))
            .await
    }

    async fn mutate_posterior<F>(&self, arm_id: i64, mutate: F) -> StoreResult<ArmPosterior>
    where
        F: FnOnce(&mut ArmPosterior),
    {
        let lock = {
            let mut locks = self.arm_locks.lock().await;
            locks
                .entry(arm_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = tokio::time::timeout(self.timeouts.lock, lock.lock())
            .await
            .map_err(|_| StoreError::LockTimeout { arm_id })?;

        let mut posterior = self
            .posteriors
            .get(arm_id)
            .await?
            .unwrap_or_else(|| ArmPosterior::new(arm_id, Utc::now()));
        mutate(&mut posterior);

        tokio::time::timeout(self.timeouts.write, self.posteriors.upsert(&posterior))
            .await
            .map_err(|_| StoreError::WriteTimeout(self.timeouts.write))??;

        drop(guard);
        Ok(posterior)
    }

    /// Read one arm's last committed posterior without taking its lock.
    pub async fn get_posterior(&self, arm_id: i64) -> StoreResult<Option<ArmPosterior>> {
        Ok(self.posteriors.get(arm_id).await?)
    }

    /// Append to the change log, enforcing a monotonic timestamp per
    /// campaign.
    pub async fn append_change(&self, change: &AllocationChange) -> StoreResult<i64> {
        let mut adjusted = change.clone();
        {
            let mut watermarks = self.last_change_ts.lock().await;
            if let Some(last) = watermarks.get(&change.campaign_id) {
                if adjusted.ts <= *last {
                    adjusted.ts = *last + chrono::Duration::milliseconds(1);
                }
            }
            watermarks.insert(change.campaign_id, adjusted.ts);
        }

        let id = tokio::time::timeout(self.timeouts.write, self.changes.append(&adjusted))
            .await
            .map_err(|_| StoreError::WriteTimeout(self.timeouts.write))??;
        Ok(id)
    }

    /// Transition a campaign's status (single writer: the supervisor).
    pub async fn update_campaign_status(
        &self,
        campaign_id: i64,
        status: CampaignStatus,
    ) -> StoreResult<()> {
        self.campaigns.update_status(campaign_id, status).await?;
        Ok(())
    }

    /// Enforce the budget invariant on a snapshot. A breach is
    /// non-recoverable for the campaign.
    pub fn verify_budget(snapshot: &CampaignSnapshot) -> DomainResult<()> {
        // Float slack: a half-cent over is bookkeeping noise, not a breach.
        if snapshot.spent > snapshot.campaign.total_budget + 0.005 {
            return Err(DomainError::BudgetBreached {
                spent: snapshot.spent,
                budget: snapshot.campaign.total_budget,
            });
        }
        Ok(())
    }

    /// Journal an intended allocation for crash recovery.
    pub async fn journal_intent(&self, intent: &IntendedAllocation) -> StoreResult<()> {
        tokio::time::timeout(self.timeouts.write, self.journal.record(intent))
            .await
            .map_err(|_| StoreError::WriteTimeout(self.timeouts.write))??;
        debug!(
            campaign_id = intent.campaign_id,
            arm_id = intent.arm_id,
            alloc = intent.alloc,
            "journaled intended allocation"
        );
        Ok(())
    }

    /// Outstanding journaled intents, oldest first.
    pub async fn pending_intents(&self) -> StoreResult<Vec<IntendedAllocation>> {
        Ok(self.journal.pending().await?)
    }

    /// Clear a reconciled intent.
    pub async fn clear_intent(&self, campaign_id: i64, arm_id: i64) -> StoreResult<()> {
        self.journal.clear(campaign_id, arm_id).await?;
        Ok(())
    }
}
