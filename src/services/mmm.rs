//! Marketing-mix-model adjustment layer.
//!
//! Produces the multiplicative factors the decision core applies on top
//! of Thompson samples: seasonality keyed by `(quarter, channel)`,
//! ad-stock carryover per channel, and scalar external factors. The
//! adjuster owns the only mutable piece (per-channel ad-stock, fed by
//! applied allocations); decisions read an immutable `MmmView`.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};

use crate::domain::models::MmmConfig;

/// Calendar quarter (1-4) of an instant.
pub fn quarter_of(ts: DateTime<Utc>) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let month = ts.month() as u8;
    (month - 1) / 3 + 1
}

/// Factors applicable to one channel for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelFactors {
    pub seasonality: f64,
    pub carryover: f64,
}

impl Default for ChannelFactors {
    fn default() -> Self {
        Self {
            seasonality: 1.0,
            carryover: 1.0,
        }
    }
}

/// Immutable per-cycle factor view handed to the decision core.
#[derive(Debug, Clone, Default)]
pub struct MmmView {
    per_channel: HashMap<String, ChannelFactors>,
    /// Named external multipliers, applied to every arm.
    pub external: Vec<(String, f64)>,
}

impl MmmView {
    pub fn channel(&self, channel: &str) -> ChannelFactors {
        self.per_channel
            .get(channel)
            .copied()
            .unwrap_or_default()
    }

    pub fn external_product(&self) -> f64 {
        self.external.iter().map(|(_, m)| m).product()
    }
}

/// MMM factor tables plus mutable ad-stock state.
pub struct MmmAdjuster {
    seasonality: HashMap<(u8, String), f64>,
    external: Vec<(String, f64)>,
    /// Ad-stock per `(campaign, channel)`, accrued from applied
    /// allocation shares and decayed each cycle.
    stocks: HashMap<(i64, String), f64>,
    decay: f64,
    cap: f64,
}

impl MmmAdjuster {
    pub fn new(config: &MmmConfig, decay: f64, cap: f64) -> Self {
        let seasonality = config
            .seasonality
            .iter()
            .map(|rule| ((rule.quarter, rule.channel.clone()), rule.multiplier))
            .collect();
        let external = config
            .external
            .iter()
            .map(|f| (f.name.clone(), f.multiplier))
            .collect();
        Self {
            seasonality,
            external,
            stocks: HashMap::new(),
            decay,
            cap,
        }
    }

    /// Build the factor view for one campaign cycle.
    pub fn view(&self, campaign_id: i64, channels: &[String], now: DateTime<Utc>) -> MmmView {
        let quarter = quarter_of(now);
        let mut per_channel = HashMap::new();
        for channel in channels {
            let seasonality = self
                .seasonality
                .get(&(quarter, channel.clone()))
                .copied()
                .unwrap_or(1.0);
            let stock = self
                .stocks
                .get(&(campaign_id, channel.clone()))
                .copied()
                .unwrap_or(0.0);
            let carryover = (1.0 + self.decay * stock).min(self.cap);
            per_channel.insert(
                channel.clone(),
                ChannelFactors {
                    seasonality,
                    carryover,
                },
            );
        }
        MmmView {
            per_channel,
            external: self.external.clone(),
        }
    }

    /// Feed one applied allocation share into a channel's ad-stock.
    ///
    /// `stock <- min(cap, share + decay * stock)`: the stock decays
    /// geometrically and saturates at the configured ceiling.
    pub fn observe_allocation(&mut self, campaign_id: i64, channel: &str, share: f64) {
        let entry = self
            .stocks
            .entry((campaign_id, channel.to_string()))
            .or_insert(0.0);
        *entry = (share + self.decay * *entry).min(self.cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExternalFactor, SeasonalityRule};
    use chrono::TimeZone;

    fn config() -> MmmConfig {
        MmmConfig {
            seasonality: vec![SeasonalityRule {
                quarter: 4,
                channel: "search".to_string(),
                multiplier: 1.2,
            }],
            external: vec![ExternalFactor {
                name: "competitor_exit".to_string(),
                multiplier: 1.1,
            }],
        }
    }

    #[test]
    fn test_quarter_of() {
        let q1 = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();
        let q4 = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        assert_eq!(quarter_of(q1), 1);
        assert_eq!(quarter_of(q4), 4);
    }

    #[test]
    fn test_seasonality_applies_only_in_quarter() {
        let adjuster = MmmAdjuster::new(&config(), 0.7, 1.5);
        let channels = vec!["search".to_string(), "social".to_string()];

        let q3 = Utc.with_ymd_and_hms(2026, 9, 30, 0, 0, 0).unwrap();
        let view = adjuster.view(1, &channels, q3);
        assert!((view.channel("search").seasonality - 1.0).abs() < 1e-12);

        let q4 = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let view = adjuster.view(1, &channels, q4);
        assert!((view.channel("search").seasonality - 1.2).abs() < 1e-12);
        assert!((view.channel("social").seasonality - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_carryover_accrues_and_saturates() {
        let mut adjuster = MmmAdjuster::new(&config(), 0.5, 1.5);
        let channels = vec!["search".to_string()];
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

        // No stock yet: neutral multiplier.
        let view = adjuster.view(1, &channels, now);
        assert!((view.channel("search").carryover - 1.0).abs() < 1e-12);

        adjuster.observe_allocation(1, "search", 0.6);
        let view = adjuster.view(1, &channels, now);
        assert!((view.channel("search").carryover - 1.3).abs() < 1e-12);

        // Saturation at the cap.
        for _ in 0..50 {
            adjuster.observe_allocation(1, "search", 1.0);
        }
        let view = adjuster.view(1, &channels, now);
        assert!(view.channel("search").carryover <= 1.5 + 1e-12);
    }

    #[test]
    fn test_stock_is_scoped_per_campaign() {
        let mut adjuster = MmmAdjuster::new(&config(), 0.5, 1.5);
        let channels = vec!["search".to_string()];
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

        adjuster.observe_allocation(1, "search", 0.8);
        let other = adjuster.view(2, &channels, now);
        assert!((other.channel("search").carryover - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_external_product() {
        let adjuster = MmmAdjuster::new(&config(), 0.7, 1.5);
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let view = adjuster.view(1, &[], now);
        assert!((view.external_product() - 1.1).abs() < 1e-12);
    }
}
