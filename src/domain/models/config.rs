//! Configuration model.
//!
//! Loaded hierarchically by the config loader: programmatic defaults,
//! then `adbandit.yaml`, then `adbandit.local.yaml`, then `ADBANDIT_*`
//! environment variables.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub retry: RetryConfig,
    pub webhook: WebhookConfig,
    /// Ad platforms the engine polls and bids against.
    pub platforms: Vec<PlatformConfig>,
    pub mmm: MmmConfig,
}

/// Tunables of the decision algorithm and the service loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default decision cadence for new campaigns (ms).
    pub cycle_default_ms: u64,
    /// Default risk tolerance for new campaigns, in `[0, 1]`.
    pub risk_tolerance_default: f64,
    /// Default reward-variance ceiling for new campaigns.
    pub variance_limit_default: f64,
    /// Below this trial count, high-variance arms get the exploration
    /// penalty instead of the full risk discount.
    pub min_trials_for_risk_gate: u64,
    /// Per-arm per-cycle allocation change bound, in `(0, 1]`.
    pub max_step: f64,
    /// Minimum exploration share per enabled arm.
    pub min_alloc_floor: f64,
    /// Allocation deltas below this are not logged.
    pub report_threshold: f64,
    /// Z-score beyond which a metric row is flagged suspect.
    pub anomaly_z: f64,
    /// Graceful-shutdown drain budget (ms).
    pub drain_timeout_ms: u64,
    /// Ad-stock decay rate, in `(0, 1)`.
    pub carryover_decay: f64,
    /// Ad-stock multiplier ceiling, `>= 1`.
    pub carryover_cap: f64,
    /// Beta trial cap per arm per cycle.
    pub max_trials_per_cycle: u64,
    /// ROAS delta beyond which a webhook hint triggers an out-of-cycle
    /// posterior update.
    pub webhook_delta_threshold: f64,
    /// Change-log retention window (days).
    pub retention_days: u32,
    /// Upper bound on concurrent campaign cycles; 0 = cores * 4.
    pub max_concurrent_cycles: usize,
    /// Upper plausibility bound for observed ROAS.
    pub roas_max: f64,
    /// Bounded batch size when draining pending metrics into a cycle.
    pub drain_batch_size: usize,
    /// Pending-queue capacity per campaign before webhook drops begin.
    pub pending_queue_capacity: usize,
    /// Platform fetch deadline (ms).
    pub fetch_timeout_ms: u64,
    /// Bid update deadline (ms).
    pub bid_timeout_ms: u64,
    /// Durable write deadline (ms).
    pub write_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_default_ms: 900_000,
            risk_tolerance_default: 0.5,
            variance_limit_default: 4.0,
            min_trials_for_risk_gate: 100,
            max_step: 0.1,
            min_alloc_floor: 0.01,
            report_threshold: 1e-4,
            anomaly_z: 3.0,
            drain_timeout_ms: 30_000,
            carryover_decay: 0.7,
            carryover_cap: 1.5,
            max_trials_per_cycle: 10_000,
            webhook_delta_threshold: 0.5,
            retention_days: 90,
            max_concurrent_cycles: 0,
            roas_max: 100.0,
            drain_batch_size: 256,
            pending_queue_capacity: 1024,
            fetch_timeout_ms: 30_000,
            bid_timeout_ms: 10_000,
            write_timeout_ms: 5_000,
        }
    }
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".adbandit/adbandit.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// Optional directory for rotated log files; stderr only when unset.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            directory: None,
        }
    }
}

/// Transient-failure retry policy for platform I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind_addr: String,
    pub enabled: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            enabled: true,
        }
    }
}

/// One ad platform binding.
///
/// Credentials are not configured here; they come from the environment
/// (`ADBANDIT_<NAME>_API_KEY`, `ADBANDIT_<NAME>_WEBHOOK_SECRET`). A
/// platform without credentials is skipped by the poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    pub account_id: String,
    /// Base URL for the generic REST adapter.
    pub base_url: String,
    /// Token-bucket refill rate for API calls.
    pub poll_rate_per_sec: u32,
    /// Token-bucket burst size.
    pub burst_size: u32,
    /// How often to poll for fresh metrics (ms).
    pub poll_interval_ms: u64,
    /// Cap on concurrent in-flight calls to this platform.
    pub max_concurrent_calls: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            account_id: String::new(),
            base_url: String::new(),
            poll_rate_per_sec: 5,
            burst_size: 10,
            poll_interval_ms: 60_000,
            max_concurrent_calls: 4,
        }
    }
}

/// Marketing-mix-model factor tables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MmmConfig {
    /// Seasonality multipliers keyed by `(quarter, channel)`.
    pub seasonality: Vec<SeasonalityRule>,
    /// Scalar external-factor multipliers applied to every arm.
    pub external: Vec<ExternalFactor>,
}

/// Seasonality multiplier for one channel in one quarter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalityRule {
    /// Calendar quarter, 1-4.
    pub quarter: u8,
    pub channel: String,
    pub multiplier: f64,
}

/// Named scalar multiplier for an external effect (competitor launch,
/// macro conditions, promo calendar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalFactor {
    pub name: String,
    pub multiplier: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.engine.cycle_default_ms, 900_000);
        assert!((c.engine.max_step - 0.1).abs() < f64::EPSILON);
        assert!((c.engine.report_threshold - 1e-4).abs() < f64::EPSILON);
        assert_eq!(c.engine.retention_days, 90);
        assert_eq!(c.database.path, ".adbandit/adbandit.db");
        assert_eq!(c.logging.level, "info");
        assert_eq!(c.retry.max_retries, 5);
        assert!(c.platforms.is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r"
engine:
  max_step: 0.2
  anomaly_z: 2.5
platforms:
  - name: adwords
    account_id: acct-1
    base_url: https://ads.example.com
    poll_rate_per_sec: 2
mmm:
  seasonality:
    - quarter: 4
      channel: search
      multiplier: 1.2
";
        let c: Config = serde_yaml::from_str(yaml).expect("yaml should parse");
        assert!((c.engine.max_step - 0.2).abs() < f64::EPSILON);
        assert!((c.engine.anomaly_z - 2.5).abs() < f64::EPSILON);
        assert_eq!(c.platforms.len(), 1);
        assert_eq!(c.platforms[0].name, "adwords");
        assert_eq!(c.platforms[0].burst_size, 10, "unset fields take defaults");
        assert_eq!(c.mmm.seasonality[0].quarter, 4);
    }
}
