//! Domain models for the optimization engine.

pub mod arm;
pub mod campaign;
pub mod change;
pub mod config;
pub mod metric;
pub mod posterior;

pub use arm::{arm_key, Arm, NewArm};
pub use campaign::{Campaign, CampaignStatus, NewCampaign, PrimaryKpi};
pub use change::{AllocationChange, ChangeReason, InitiatedBy};
pub use config::{
    Config, DatabaseConfig, EngineConfig, ExternalFactor, LoggingConfig, MmmConfig,
    PlatformConfig, RetryConfig, SeasonalityRule, WebhookConfig,
};
pub use metric::{Metric, MetricQuality, MetricSource};
pub use posterior::{ArmPosterior, PosteriorUpdate, PRIOR_ALPHA, PRIOR_BETA};
