//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test doubles used across
//! multiple integration test files.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use tokio::sync::Mutex;

use adbandit::domain::models::{
    Campaign, CampaignStatus, Metric, MetricQuality, MetricSource, NewArm, NewCampaign,
    PrimaryKpi,
};
use adbandit::domain::ports::{
    AdPlatform, ArmBinding, CampaignRepository, ChangeLogRepository, JournalRepository,
    MetricRepository, PlatformError, PosteriorRepository, RemoteCampaign,
};
use adbandit::infrastructure::database::{
    CampaignRepositoryImpl, ChangeLogRepositoryImpl, DatabaseConnection, JournalRepositoryImpl,
    MetricRepositoryImpl, PosteriorRepositoryImpl,
};
use adbandit::services::{IngestConfig, MetricIngestor, PosteriorStore, StoreTimeouts};

/// A migrated file-backed test database. Keep the `TempDir` alive for
/// the duration of the test.
pub struct TestDb {
    pub _dir: TempDir,
    pub db: DatabaseConnection,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let db = DatabaseConnection::new(&url)
        .await
        .expect("failed to create database connection");
    db.migrate().await.expect("failed to run migrations");
    TestDb { _dir: dir, db }
}

/// All repositories over one pool.
pub struct Repos {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub metrics: Arc<dyn MetricRepository>,
    pub posteriors: Arc<dyn PosteriorRepository>,
    pub changes: Arc<dyn ChangeLogRepository>,
    pub journal: Arc<dyn JournalRepository>,
}

pub fn repos(db: &DatabaseConnection) -> Repos {
    let pool = db.pool().clone();
    Repos {
        campaigns: Arc::new(CampaignRepositoryImpl::new(pool.clone())),
        metrics: Arc::new(MetricRepositoryImpl::new(pool.clone())),
        posteriors: Arc::new(PosteriorRepositoryImpl::new(pool.clone())),
        changes: Arc::new(ChangeLogRepositoryImpl::new(pool.clone())),
        journal: Arc::new(JournalRepositoryImpl::new(pool)),
    }
}

pub fn store_over(repos: &Repos) -> Arc<PosteriorStore> {
    Arc::new(PosteriorStore::new(
        repos.campaigns.clone(),
        repos.metrics.clone(),
        repos.posteriors.clone(),
        repos.changes.clone(),
        repos.journal.clone(),
        StoreTimeouts {
            lock: Duration::from_secs(2),
            write: Duration::from_secs(2),
        },
    ))
}

pub fn ingest_config() -> IngestConfig {
    IngestConfig {
        anomaly_z: 3.0,
        roas_max: 100.0,
        max_trials_per_cycle: 10_000,
        webhook_delta_threshold: 0.5,
        pending_queue_capacity: 64,
        allow_free_revenue: false,
    }
}

pub fn ingestor_over(store: Arc<PosteriorStore>) -> Arc<MetricIngestor> {
    Arc::new(MetricIngestor::new(store, ingest_config()))
}

/// Create an Active campaign with the given arms (platform "mock",
/// channel per tuple). Returns the campaign and its arm ids keyed by
/// creative.
pub async fn seed_campaign(
    campaigns: &Arc<dyn CampaignRepository>,
    name: &str,
    budget: f64,
    arms: &[(&str, &str)],
) -> (Campaign, HashMap<String, i64>) {
    let draft = NewCampaign {
        name: name.to_string(),
        total_budget: budget,
        start: Utc::now() - ChronoDuration::hours(1),
        end: None,
        primary_kpi: PrimaryKpi::Roas,
        risk_tolerance: 0.5,
        variance_limit: 4.0,
        cadence_ms: 900_000,
    };
    let campaign = campaigns.create(&draft).await.expect("create campaign");

    let mut ids = HashMap::new();
    for (channel, creative) in arms {
        let arm = campaigns
            .add_arm(
                campaign.id,
                &NewArm {
                    platform: "mock".to_string(),
                    channel: (*channel).to_string(),
                    creative: (*creative).to_string(),
                    bid: 1.0,
                },
            )
            .await
            .expect("add arm");
        ids.insert((*creative).to_string(), arm.id);
    }

    campaigns
        .update_status(campaign.id, CampaignStatus::Active)
        .await
        .expect("activate");

    let mut campaign = campaign;
    campaign.status = CampaignStatus::Active;
    (campaign, ids)
}

/// One poll metric window.
pub fn poll_metric(
    arm_id: i64,
    ts: DateTime<Utc>,
    clicks: u64,
    conversions: u64,
    cost: f64,
    revenue: f64,
) -> Metric {
    Metric {
        arm_id,
        ts,
        source: MetricSource::Poll,
        impressions: clicks * 10,
        clicks,
        conversions,
        cost,
        revenue,
        quality: MetricQuality::Ok,
    }
}

/// AdPlatform test double: records bids, optionally fails them.
pub struct MockPlatform {
    name: String,
    pub bids: Mutex<Vec<(i64, f64)>>,
    pub fail_bids: AtomicBool,
    pub metrics_to_serve: Mutex<Vec<Metric>>,
}

impl MockPlatform {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            bids: Mutex::new(Vec::new()),
            fail_bids: AtomicBool::new(false),
            metrics_to_serve: Mutex::new(Vec::new()),
        })
    }

    pub async fn recorded_bids(&self) -> Vec<(i64, f64)> {
        self.bids.lock().await.clone()
    }
}

#[async_trait]
impl AdPlatform for MockPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_metrics(
        &self,
        _account_id: &str,
        bindings: &[ArmBinding],
        since: DateTime<Utc>,
    ) -> Result<Vec<Metric>, PlatformError> {
        let served = self.metrics_to_serve.lock().await;
        Ok(served
            .iter()
            .filter(|m| m.ts > since && bindings.iter().any(|b| b.arm_id == m.arm_id))
            .cloned()
            .collect())
    }

    async fn set_bid(&self, binding: &ArmBinding, bid: f64) -> Result<(), PlatformError> {
        if self.fail_bids.load(Ordering::Acquire) {
            return Err(PlatformError::Transient("simulated outage".to_string()));
        }
        self.bids.lock().await.push((binding.arm_id, bid));
        Ok(())
    }

    async fn list_campaigns(
        &self,
        _account_id: &str,
    ) -> Result<Vec<RemoteCampaign>, PlatformError> {
        Ok(vec![])
    }
}
