use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_step: {0}. Must be in (0, 1]")]
    InvalidMaxStep(f64),

    #[error("Invalid min_alloc_floor: {0}. Must be non-negative and below 1")]
    InvalidAllocFloor(f64),

    #[error("Invalid risk_tolerance_default: {0}. Must be in [0, 1]")]
    InvalidRiskTolerance(f64),

    #[error("Invalid carryover_decay: {0}. Must be in (0, 1)")]
    InvalidCarryoverDecay(f64),

    #[error("Invalid carryover_cap: {0}. Must be at least 1")]
    InvalidCarryoverCap(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid seasonality quarter: {0}. Must be 1-4")]
    InvalidQuarter(u8),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. adbandit.yaml (project config)
    /// 3. adbandit.local.yaml (local overrides, optional)
    /// 4. Environment variables (ADBANDIT_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("adbandit.yaml"))
            .merge(Yaml::file("adbandit.local.yaml"))
            .merge(Env::prefixed("ADBANDIT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let engine = &config.engine;

        if !(engine.max_step > 0.0 && engine.max_step <= 1.0) {
            return Err(ConfigError::InvalidMaxStep(engine.max_step));
        }

        if !(0.0..1.0).contains(&engine.min_alloc_floor) {
            return Err(ConfigError::InvalidAllocFloor(engine.min_alloc_floor));
        }

        if !(0.0..=1.0).contains(&engine.risk_tolerance_default) {
            return Err(ConfigError::InvalidRiskTolerance(
                engine.risk_tolerance_default,
            ));
        }

        if !(engine.carryover_decay > 0.0 && engine.carryover_decay < 1.0) {
            return Err(ConfigError::InvalidCarryoverDecay(engine.carryover_decay));
        }

        if engine.carryover_cap < 1.0 {
            return Err(ConfigError::InvalidCarryoverCap(engine.carryover_cap));
        }

        if engine.report_threshold < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "report_threshold must be non-negative, got {}",
                engine.report_threshold
            )));
        }

        if engine.variance_limit_default < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "variance_limit_default must be non-negative, got {}",
                engine.variance_limit_default
            )));
        }

        if engine.cycle_default_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "cycle_default_ms must be positive".to_string(),
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        for platform in &config.platforms {
            if platform.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "platform name cannot be empty".to_string(),
                ));
            }
            if platform.poll_rate_per_sec == 0 || platform.burst_size == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "platform '{}' rate limit must be positive",
                    platform.name
                )));
            }
        }

        for rule in &config.mmm.seasonality {
            if !(1..=4).contains(&rule.quarter) {
                return Err(ConfigError::InvalidQuarter(rule.quarter));
            }
            if rule.multiplier <= 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "seasonality multiplier for {} must be positive",
                    rule.channel
                )));
            }
        }

        for factor in &config.mmm.external {
            if factor.multiplier <= 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "external factor '{}' multiplier must be positive",
                    factor.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SeasonalityRule;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.engine.cycle_default_ms, 900_000);
        assert_eq!(config.database.path, ".adbandit/adbandit.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn test_validate_bad_max_step() {
        let mut config = Config::default();
        config.engine.max_step = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxStep(_))
        ));

        config.engine.max_step = 1.5;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_bad_carryover() {
        let mut config = Config::default();
        config.engine.carryover_decay = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCarryoverDecay(_))
        ));

        let mut config = Config::default();
        config.engine.carryover_cap = 0.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCarryoverCap(_))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 60_000;
        config.retry.max_backoff_ms = 1_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(60_000, 1_000))
        ));
    }

    #[test]
    fn test_validate_invalid_quarter() {
        let mut config = Config::default();
        config.mmm.seasonality.push(SeasonalityRule {
            quarter: 5,
            channel: "search".to_string(),
            multiplier: 1.2,
        });
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidQuarter(5))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "engine:\n  max_step: 0.05\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "logging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert!((config.engine.max_step - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "debug", "override should win");
        assert_eq!(
            config.logging.format, "json",
            "base value should persist when not overridden"
        );
    }
}
