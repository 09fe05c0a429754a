//! Scheduler and service loop.
//!
//! The supervisor owns every long-running task: one cycle loop per
//! Active campaign, lifecycle scanning, journal reconciliation on
//! startup, and change-log retention. Cycles are strictly sequential per
//! campaign (a slow cycle delays its next tick and is logged as an
//! overrun, never overlapped) and independent across campaigns, bounded
//! by a semaphore. Shutdown is a drain: every in-flight cycle finishes
//! or is aborted at the drain deadline, and any bid update not confirmed
//! by then is journaled for reconciliation at next start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{
    AllocationChange, Arm, Campaign, CampaignStatus, ChangeReason, InitiatedBy,
};
use crate::domain::ports::{AdPlatform, ArmBinding, BanditAgent, IntendedAllocation};
use crate::services::decision::{decide, DecisionContext, DecisionParams};
use crate::services::ingest::{ArmIndex, MetricIngestor};
use crate::services::mmm::MmmAdjuster;
use crate::services::store::{CampaignSnapshot, PosteriorStore, StoreError};

/// Supervisor tunables, resolved from engine config.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Campaign lifecycle scan interval.
    pub supervise_interval: Duration,
    /// Graceful-shutdown drain budget.
    pub drain_timeout: Duration,
    /// Concurrent cycle cap; 0 resolves to cores * 4.
    pub max_concurrent_cycles: usize,
    /// Bid update deadline.
    pub bid_timeout: Duration,
    /// Bounded batch when draining pending metrics into a cycle.
    pub drain_batch_size: usize,
    /// Change-log retention window in days.
    pub retention_days: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            supervise_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            max_concurrent_cycles: 0,
            bid_timeout: Duration::from_secs(10),
            drain_batch_size: 256,
            retention_days: 90,
        }
    }
}

impl SupervisorConfig {
    fn resolved_cycle_cap(&self) -> usize {
        if self.max_concurrent_cycles > 0 {
            return self.max_concurrent_cycles;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 4)
            .unwrap_or(16)
    }
}

/// Events emitted by the supervisor.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    CycleCompleted {
        campaign_id: i64,
        tick: u64,
        changes: usize,
    },
    CycleOverrun {
        campaign_id: i64,
    },
    CampaignCompleted {
        campaign_id: i64,
    },
    CampaignErrored {
        campaign_id: i64,
        reason: String,
    },
    Reconciled {
        campaign_id: i64,
        arm_id: i64,
    },
    RetentionPruned {
        removed: u64,
    },
    Draining,
    Stopped,
}

/// Outcome of one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Ran { changes: usize, completed: bool },
    /// Campaign was not Active at snapshot time.
    Skipped,
    /// Campaign escalated to Errored during the cycle.
    Errored,
}

struct CycleHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Bid for an arm at a given allocation share.
///
/// The base bid is what the arm gets at the uniform share; the bid moves
/// linearly with the allocated share so doubling an arm's share doubles
/// its bid.
pub fn bid_for_alloc(base_bid: f64, alloc: f64, enabled_arms: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let uniform = 1.0 / (enabled_arms.max(1) as f64);
    (base_bid * alloc / uniform).max(0.0)
}

/// The service-loop supervisor.
pub struct Supervisor {
    store: Arc<PosteriorStore>,
    ingestor: Arc<MetricIngestor>,
    agent: Arc<dyn BanditAgent>,
    platforms: HashMap<String, Arc<dyn AdPlatform>>,
    mmm: Mutex<MmmAdjuster>,
    params: DecisionParams,
    config: SupervisorConfig,
    index: Arc<RwLock<ArmIndex>>,
    stop_flag: Arc<AtomicBool>,
    cycle_semaphore: Arc<Semaphore>,
    cycles: Mutex<HashMap<i64, CycleHandle>>,
    /// Spend watermark per campaign, for projecting next-cycle spend.
    last_spent: Mutex<HashMap<i64, f64>>,
    events_tx: mpsc::Sender<EngineEvent>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PosteriorStore>,
        ingestor: Arc<MetricIngestor>,
        agent: Arc<dyn BanditAgent>,
        platforms: HashMap<String, Arc<dyn AdPlatform>>,
        mmm: MmmAdjuster,
        params: DecisionParams,
        config: SupervisorConfig,
        index: Arc<RwLock<ArmIndex>>,
    ) -> (Arc<Self>, mpsc::Receiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let cap = config.resolved_cycle_cap();
        let supervisor = Arc::new(Self {
            store,
            ingestor,
            agent,
            platforms,
            mmm: Mutex::new(mmm),
            params,
            config,
            index,
            stop_flag: Arc::new(AtomicBool::new(false)),
            cycle_semaphore: Arc::new(Semaphore::new(cap)),
            cycles: Mutex::new(HashMap::new()),
            last_spent: Mutex::new(HashMap::new()),
            events_tx,
        });
        (supervisor, events_rx)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.try_send(event);
    }

    /// Run the supervisor until stopped, then drain.
    ///
    /// Startup order: reconcile the journal first, then begin ticking.
    /// A store that cannot be reached at all is fatal; the caller exits
    /// non-zero so the orchestrator restarts the process.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.reconcile_journal().await?;
        self.emit(EngineEvent::Started);
        info!("supervisor started");

        let mut ticker = interval(self.config.supervise_interval);
        let mut consecutive_store_failures = 0u32;
        let mut last_prune = Instant::now();

        loop {
            ticker.tick().await;
            if self.is_stopping() {
                break;
            }

            match self.scan_campaigns().await {
                Ok(()) => consecutive_store_failures = 0,
                Err(e) => {
                    consecutive_store_failures += 1;
                    error!(error = %e, failures = consecutive_store_failures, "lifecycle scan failed");
                    if consecutive_store_failures >= 3 {
                        // Unreachable store: nothing to do but exit so
                        // the orchestrator restarts us.
                        self.drain().await;
                        anyhow::bail!("posterior store unreachable: {e}");
                    }
                }
            }

            if last_prune.elapsed() >= Duration::from_secs(24 * 60 * 60) {
                last_prune = Instant::now();
                self.prune_change_log().await;
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Reconcile journaled intents from a previous crash by re-issuing
    /// `set_bid` idempotently before the first new cycle.
    pub async fn reconcile_journal(&self) -> anyhow::Result<()> {
        let intents = self.store.pending_intents().await?;
        if intents.is_empty() {
            return Ok(());
        }
        info!(count = intents.len(), "reconciling journaled allocations");

        for intent in intents {
            let Some(arm) = self.store.campaigns().get_arm(intent.arm_id).await? else {
                self.store.clear_intent(intent.campaign_id, intent.arm_id).await?;
                continue;
            };
            let enabled = self
                .store
                .campaigns()
                .list_arms(intent.campaign_id)
                .await?
                .iter()
                .filter(|a| !a.disabled)
                .count();

            if let Some(platform) = self.platforms.get(&arm.platform) {
                let binding = ArmBinding {
                    arm_id: arm.id,
                    arm_key: arm.arm_key(),
                };
                let bid = bid_for_alloc(arm.bid, intent.alloc, enabled);
                let result = tokio::time::timeout(
                    self.config.bid_timeout,
                    platform.set_bid(&binding, bid),
                )
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(arm_id = arm.id, error = %e, "reconcile set_bid failed; keeping intent");
                        continue;
                    }
                    Err(_) => {
                        warn!(arm_id = arm.id, "reconcile set_bid timed out; keeping intent");
                        continue;
                    }
                }
            }

            let change = AllocationChange {
                id: 0,
                campaign_id: intent.campaign_id,
                arm_id: intent.arm_id,
                ts: Utc::now(),
                old_alloc: intent.alloc,
                new_alloc: intent.alloc,
                reason: ChangeReason::Reconcile,
                factors: std::collections::BTreeMap::new(),
                mmm_factors: std::collections::BTreeMap::new(),
                initiated_by: InitiatedBy::Auto,
                state_snapshot: serde_json::json!({"journaled_ts": intent.ts.to_rfc3339()}),
            };
            self.store.append_change(&change).await?;
            self.store.clear_intent(intent.campaign_id, intent.arm_id).await?;
            self.emit(EngineEvent::Reconciled {
                campaign_id: intent.campaign_id,
                arm_id: intent.arm_id,
            });
        }
        Ok(())
    }

    /// One lifecycle pass: start cycle loops for Active campaigns, stop
    /// loops whose campaigns left Active, refresh the arm index.
    async fn scan_campaigns(self: &Arc<Self>) -> Result<(), StoreError> {
        if let Ok(index) = ArmIndex::load(self.store.campaigns()).await {
            *self.index.write().await = index;
        }

        let campaigns = self.store.campaigns().list(None).await?;
        let mut cycles = self.cycles.lock().await;

        cycles.retain(|_, handle| !handle.join.is_finished());

        for campaign in campaigns {
            let running = cycles.contains_key(&campaign.id);
            match campaign.status {
                CampaignStatus::Active if !running => {
                    let stop = Arc::new(AtomicBool::new(false));
                    let join = tokio::spawn(Self::run_campaign_loop(
                        self.clone(),
                        campaign.clone(),
                        stop.clone(),
                    ));
                    cycles.insert(campaign.id, CycleHandle { stop, join });
                    info!(campaign_id = campaign.id, "campaign cycle loop started");
                }
                CampaignStatus::Active => {}
                _ => {
                    if let Some(handle) = cycles.get(&campaign.id) {
                        // Pause/terminal: signal at the tick boundary; the
                        // in-flight cycle runs to completion.
                        handle.stop.store(true, Ordering::Release);
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-campaign tick loop. Strictly sequential; a cycle that outruns
    /// its cadence triggers the next one immediately (warned, never
    /// queued).
    async fn run_campaign_loop(self: Arc<Self>, campaign: Campaign, stop: Arc<AtomicBool>) {
        let cadence = Duration::from_millis(campaign.cadence_ms.max(1));
        let mut ticker = interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if stop.load(Ordering::Acquire) || self.is_stopping() {
                break;
            }

            let started = Instant::now();
            match self.run_cycle_once(campaign.id).await {
                Ok(CycleOutcome::Ran { completed: true, .. }) => {
                    self.emit(EngineEvent::CampaignCompleted {
                        campaign_id: campaign.id,
                    });
                    break;
                }
                Ok(CycleOutcome::Ran { .. }) => {}
                Ok(CycleOutcome::Skipped) => {
                    debug!(campaign_id = campaign.id, "cycle skipped (not active)");
                }
                Ok(CycleOutcome::Errored) => break,
                Err(e) => {
                    warn!(campaign_id = campaign.id, error = %e, "cycle failed");
                }
            }

            if started.elapsed() > cadence {
                warn!(
                    campaign_id = campaign.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    cadence_ms = campaign.cadence_ms,
                    "cycle overran its cadence"
                );
                self.emit(EngineEvent::CycleOverrun {
                    campaign_id: campaign.id,
                });
            }
        }
        debug!(campaign_id = campaign.id, "campaign cycle loop exited");
    }

    /// One observe -> decide -> apply -> log cycle.
    ///
    /// The ingestor retries a lock-wait timeout once, against a fresh
    /// snapshot, at the write site. A timeout that still reaches here
    /// means the retry was already spent, so the campaign escalates to
    /// Errored.
    pub async fn run_cycle_once(&self, campaign_id: i64) -> Result<CycleOutcome, StoreError> {
        let _permit = self
            .cycle_semaphore
            .acquire()
            .await
            .map_err(|_| StoreError::Domain(DomainError::DatabaseError(
                "cycle semaphore closed".to_string(),
            )))?;

        match self.cycle_inner(campaign_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e @ StoreError::LockTimeout { .. }) => {
                self.escalate_errored(campaign_id, ChangeReason::StoreFailure, &e.to_string())
                    .await;
                Ok(CycleOutcome::Errored)
            }
            Err(e) => Err(e),
        }
    }

    async fn cycle_inner(&self, campaign_id: i64) -> Result<CycleOutcome, StoreError> {
        let now = Utc::now();

        // Observe: fold pending metrics into posteriors, then take the
        // decision snapshot.
        let fresh = self
            .ingestor
            .drain_pending_for(campaign_id, self.config.drain_batch_size)
            .await;
        if !fresh.is_empty() {
            self.ingestor
                .apply_batch(fresh, now)
                .await
                .map_err(|e| match e {
                    crate::services::ingest::IngestError::Store(s) => s,
                    other => StoreError::Domain(DomainError::ValidationFailed(other.to_string())),
                })?;
        }

        let snap = self.store.snapshot(campaign_id).await?;
        if snap.campaign.status != CampaignStatus::Active {
            return Ok(CycleOutcome::Skipped);
        }

        // Spend can never exceed budget. A breach freezes the campaign
        // immediately.
        if let Err(e) = PosteriorStore::verify_budget(&snap) {
            self.escalate_errored(campaign_id, ChangeReason::InvariantBreach, &e.to_string())
                .await;
            return Ok(CycleOutcome::Errored);
        }

        let projected = {
            let mut last = self.last_spent.lock().await;
            let prev = last.insert(campaign_id, snap.spent);
            prev.map_or(0.0, |p| (snap.spent - p).max(0.0))
        };

        let channels: Vec<String> = {
            let mut cs: Vec<String> =
                snap.arms.iter().map(|a| a.channel.clone()).collect();
            cs.sort_unstable();
            cs.dedup();
            cs
        };
        let mmm_view = self.mmm.lock().await.view(campaign_id, &channels, now);

        let ctx = DecisionContext {
            now,
            cycle_tick: snap.campaign.cycle_tick(now),
            spent: snap.spent,
            projected_cycle_spend: projected,
            old_allocations: snap.old_allocations.clone(),
            mmm: mmm_view,
        };

        let decision = decide(
            &snap.campaign,
            &snap.arms,
            &snap.posteriors,
            self.agent.as_ref(),
            &ctx,
            &self.params,
        );

        let applied = self.apply_decision(&snap, &decision).await?;

        // Feed applied channel shares into the ad-stock.
        {
            let mut mmm = self.mmm.lock().await;
            let mut by_channel: HashMap<&str, f64> = HashMap::new();
            for arm in &snap.arms {
                if let Some(alloc) = decision.allocations.get(&arm.id) {
                    *by_channel.entry(arm.channel.as_str()).or_insert(0.0) += alloc;
                }
            }
            for (channel, share) in by_channel {
                mmm.observe_allocation(campaign_id, channel, share);
            }
        }

        if decision.completed {
            self.store
                .update_campaign_status(campaign_id, CampaignStatus::Completed)
                .await?;
            info!(campaign_id, "campaign completed: budget exhausted");
        }

        self.emit(EngineEvent::CycleCompleted {
            campaign_id,
            tick: ctx.cycle_tick,
            changes: applied,
        });
        Ok(CycleOutcome::Ran {
            changes: applied,
            completed: decision.completed,
        })
    }

    /// Apply a decision: journal each intent, push the bid, log the
    /// change, clear the journal entry. The journal-first ordering means
    /// a crash or drain at any point leaves either a logged change or a
    /// reconcilable intent, never a silent allocation.
    async fn apply_decision(
        &self,
        snap: &CampaignSnapshot,
        decision: &crate::services::decision::Decision,
    ) -> Result<usize, StoreError> {
        let enabled = snap.arms.iter().filter(|a| !a.disabled).count();
        let arms_by_id: HashMap<i64, &Arm> = snap.arms.iter().map(|a| (a.id, a)).collect();
        let mut applied = 0;

        for change in &decision.changes {
            let Some(arm) = arms_by_id.get(&change.arm_id) else {
                continue;
            };

            self.store
                .journal_intent(&IntendedAllocation {
                    campaign_id: change.campaign_id,
                    arm_id: change.arm_id,
                    alloc: change.new_alloc,
                    ts: change.ts,
                })
                .await?;

            if self.is_stopping() {
                // Drain deadline pressure: keep the intent journaled and
                // let the next start reconcile.
                debug!(arm_id = change.arm_id, "drain in progress; bid left journaled");
                continue;
            }

            if let Some(platform) = self.platforms.get(&arm.platform) {
                let binding = ArmBinding {
                    arm_id: arm.id,
                    arm_key: arm.arm_key(),
                };
                let bid = bid_for_alloc(arm.bid, change.new_alloc, enabled);
                let result =
                    tokio::time::timeout(self.config.bid_timeout, platform.set_bid(&binding, bid))
                        .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(arm_id = arm.id, error = %e, "set_bid failed; intent journaled");
                        continue;
                    }
                    Err(_) => {
                        warn!(arm_id = arm.id, "set_bid timed out; intent journaled");
                        continue;
                    }
                }
            }

            self.store.append_change(change).await?;
            self.store
                .clear_intent(change.campaign_id, change.arm_id)
                .await?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Freeze the campaign and record why.
    async fn escalate_errored(&self, campaign_id: i64, reason: ChangeReason, detail: &str) {
        error!(campaign_id, detail, "campaign escalated to errored");

        if let Err(e) = self
            .store
            .update_campaign_status(campaign_id, CampaignStatus::Errored)
            .await
        {
            error!(campaign_id, error = %e, "failed to mark campaign errored");
        }

        // Campaign-level event rows carry arm_id 0.
        let change = AllocationChange::event(
            campaign_id,
            0,
            Utc::now(),
            0.0,
            reason,
            serde_json::json!({"detail": detail}),
        );
        if let Err(e) = self.store.append_change(&change).await {
            error!(campaign_id, error = %e, "failed to record error in change log");
        }

        self.emit(EngineEvent::CampaignErrored {
            campaign_id,
            reason: detail.to_string(),
        });
    }

    async fn prune_change_log(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.retention_days));
        match self.store.changes().prune_older_than(cutoff).await {
            Ok(removed) if removed > 0 => {
                info!(removed, "pruned change log beyond retention window");
                self.emit(EngineEvent::RetentionPruned { removed });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "change log pruning failed"),
        }
    }

    /// Drain: signal every cycle loop, wait up to the drain budget, then
    /// abort stragglers. Journaled intents cover anything cut off.
    pub async fn drain(&self) {
        self.emit(EngineEvent::Draining);
        self.stop_flag.store(true, Ordering::Release);

        let handles: Vec<(i64, CycleHandle)> = {
            let mut cycles = self.cycles.lock().await;
            cycles.drain().collect()
        };
        for (_, handle) in &handles {
            handle.stop.store(true, Ordering::Release);
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        for (campaign_id, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut join = handle.join;
            if tokio::time::timeout(remaining, &mut join).await.is_err() {
                warn!(campaign_id, "cycle did not drain in time; aborting");
                join.abort();
            }
        }

        self.emit(EngineEvent::Stopped);
        info!("supervisor drained");
    }
}
