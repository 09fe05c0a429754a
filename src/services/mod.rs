//! Application services for the optimization engine.

pub mod bandit;
pub mod decision;
pub mod engine;
pub mod ingest;
pub mod mmm;
pub mod poller;
pub mod store;
pub mod supervisor;
pub mod webhook;

pub use bandit::ThompsonBernoulli;
pub use decision::{cycle_seed, decide, Decision, DecisionContext, DecisionParams};
pub use engine::{Engine, EngineHandle};
pub use ingest::{
    validate_metric, ArmIndex, IngestConfig, IngestError, MetricIngestor, Submitted,
};
pub use mmm::{quarter_of, ChannelFactors, MmmAdjuster, MmmView};
pub use poller::{PlatformPoller, PollerHandle};
pub use store::{CampaignSnapshot, PosteriorStore, StoreError, StoreResult, StoreTimeouts};
pub use supervisor::{
    bid_for_alloc, CycleOutcome, EngineEvent, Supervisor, SupervisorConfig,
};
pub use webhook::{
    sign_payload, KeyedMetric, RestWebhookDecoder, WebhookDecoder, WebhookState,
};
