//! Top-level engine assembly.
//!
//! Everything that would otherwise be a process-wide singleton (config,
//! store, ingestor, supervisor, pollers, webhook server) is a field of
//! `Engine`, constructed once at boot and threaded explicitly into each
//! component.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{info, warn};

use crate::domain::models::Config;
use crate::domain::ports::AdPlatform;
use crate::infrastructure::credentials::PlatformCredentials;
use crate::infrastructure::database::{
    CampaignRepositoryImpl, ChangeLogRepositoryImpl, JournalRepositoryImpl, MetricRepositoryImpl,
    PosteriorRepositoryImpl,
};
use crate::services::bandit::ThompsonBernoulli;
use crate::services::decision::DecisionParams;
use crate::services::ingest::{ArmIndex, IngestConfig, MetricIngestor};
use crate::services::mmm::MmmAdjuster;
use crate::services::poller::{PlatformPoller, PollerHandle};
use crate::services::store::{PosteriorStore, StoreTimeouts};
use crate::services::supervisor::{EngineEvent, Supervisor, SupervisorConfig};
use crate::services::webhook::{self, RestWebhookDecoder, WebhookDecoder, WebhookState};

/// Handle for stopping a running engine from another task.
#[derive(Clone)]
pub struct EngineHandle {
    supervisor: Arc<Supervisor>,
    poller_handles: Arc<Vec<PollerHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineHandle {
    /// Begin the graceful drain.
    pub fn stop(&self) {
        info!("shutdown requested");
        self.supervisor.request_stop();
        for handle in self.poller_handles.iter() {
            handle.stop();
        }
        let _ = self.shutdown_tx.send(true);
    }
}

/// The assembled optimization engine.
pub struct Engine {
    config: Config,
    store: Arc<PosteriorStore>,
    ingestor: Arc<MetricIngestor>,
    supervisor: Arc<Supervisor>,
    pollers: Vec<PlatformPoller>,
    poller_handles: Arc<Vec<PollerHandle>>,
    webhook_state: WebhookState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    /// Wire the engine from config, a migrated pool, and the platform
    /// integrations. Returns the engine plus its event stream.
    pub fn build(
        config: Config,
        pool: SqlitePool,
        platforms: HashMap<String, Arc<dyn AdPlatform>>,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let campaigns = Arc::new(CampaignRepositoryImpl::new(pool.clone()));
        let metrics = Arc::new(MetricRepositoryImpl::new(pool.clone()));
        let posteriors = Arc::new(PosteriorRepositoryImpl::new(pool.clone()));
        let changes = Arc::new(ChangeLogRepositoryImpl::new(pool.clone()));
        let journal = Arc::new(JournalRepositoryImpl::new(pool));

        let timeouts = StoreTimeouts {
            lock: Duration::from_millis(config.engine.write_timeout_ms),
            write: Duration::from_millis(config.engine.write_timeout_ms),
        };
        let store = Arc::new(PosteriorStore::new(
            campaigns, metrics, posteriors, changes, journal, timeouts,
        ));

        let ingest_config = IngestConfig {
            anomaly_z: config.engine.anomaly_z,
            roas_max: config.engine.roas_max,
            max_trials_per_cycle: config.engine.max_trials_per_cycle,
            webhook_delta_threshold: config.engine.webhook_delta_threshold,
            pending_queue_capacity: config.engine.pending_queue_capacity,
            allow_free_revenue: false,
        };
        let ingestor = Arc::new(MetricIngestor::new(store.clone(), ingest_config));

        let params = DecisionParams {
            min_trials_for_risk_gate: config.engine.min_trials_for_risk_gate,
            max_step: config.engine.max_step,
            min_alloc_floor: config.engine.min_alloc_floor,
            report_threshold: config.engine.report_threshold,
        };
        let supervisor_config = SupervisorConfig {
            supervise_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(config.engine.drain_timeout_ms),
            max_concurrent_cycles: config.engine.max_concurrent_cycles,
            bid_timeout: Duration::from_millis(config.engine.bid_timeout_ms),
            drain_batch_size: config.engine.drain_batch_size,
            retention_days: config.engine.retention_days,
        };
        let mmm = MmmAdjuster::new(
            &config.mmm,
            config.engine.carryover_decay,
            config.engine.carryover_cap,
        );
        let index = Arc::new(RwLock::new(ArmIndex::default()));

        let (supervisor, events_rx) = Supervisor::new(
            store.clone(),
            ingestor.clone(),
            Arc::new(ThompsonBernoulli::new()),
            platforms.clone(),
            mmm,
            params,
            supervisor_config,
            index.clone(),
        );

        // Pollers only for credentialed platforms; absence of credentials
        // disables the poller, never the engine.
        let fetch_timeout = Duration::from_millis(config.engine.fetch_timeout_ms);
        let mut pollers = Vec::new();
        let mut poller_handles = Vec::new();
        let mut secrets = HashMap::new();
        for platform_config in &config.platforms {
            let credentials = PlatformCredentials::from_env(&platform_config.name);
            if let Some(secret) = &credentials.webhook_secret {
                secrets.insert(platform_config.name.clone(), secret.clone());
            }
            let Some(platform) = platforms.get(&platform_config.name) else {
                warn!(platform = %platform_config.name, "configured platform has no integration");
                continue;
            };
            if !credentials.can_poll() {
                warn!(
                    platform = %platform_config.name,
                    "no API key in environment; poller disabled"
                );
                continue;
            }
            let poller = PlatformPoller::new(
                platform.clone(),
                platform_config,
                config.retry.clone(),
                fetch_timeout,
                store.clone(),
                ingestor.clone(),
            );
            poller_handles.push(poller.handle());
            pollers.push(poller);
        }

        let decoders: HashMap<String, Arc<dyn WebhookDecoder>> = config
            .platforms
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    Arc::new(RestWebhookDecoder) as Arc<dyn WebhookDecoder>,
                )
            })
            .collect();
        let webhook_state = WebhookState::new(ingestor.clone(), index, secrets, decoders);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Self {
            config,
            store,
            ingestor,
            supervisor,
            pollers,
            poller_handles: Arc::new(poller_handles),
            webhook_state,
            shutdown_tx,
            shutdown_rx,
        };
        (engine, events_rx)
    }

    pub fn store(&self) -> Arc<PosteriorStore> {
        self.store.clone()
    }

    pub fn ingestor(&self) -> Arc<MetricIngestor> {
        self.ingestor.clone()
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor.clone()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            supervisor: self.supervisor.clone(),
            poller_handles: self.poller_handles.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Run until stopped via an `EngineHandle`, then drain everything.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = Vec::new();

        for poller in self.pollers {
            tasks.push(tokio::spawn(poller.run()));
        }

        if self.config.webhook.enabled {
            let addr = self.config.webhook.bind_addr.clone();
            let state = self.webhook_state.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = webhook::serve(&addr, state, shutdown).await {
                    warn!(error = %e, "webhook server exited with error");
                }
            }));
        }

        // The supervisor blocks until drained; its exit is the engine's.
        let result = self.supervisor.run().await;

        let _ = self.shutdown_tx.send(true);
        let _ = futures::future::join_all(tasks).await;
        result
    }
}
