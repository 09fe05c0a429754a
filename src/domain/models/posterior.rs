//! Learned per-arm belief state.
//!
//! Each arm carries a Beta posterior over its conversion probability plus
//! auxiliary reward statistics. Conversions count as Beta successes and
//! clicks minus conversions as failures, so trials accrue by clicks and
//! `alpha + beta - 2 == trials` holds for any posterior built purely from
//! observations. The continuous ROAS signal is tracked separately,
//! trial-weighted, and feeds only the risk filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::Metric;

/// Laplace-smoothed prior: Beta(1, 1) is Uniform(0, 1).
pub const PRIOR_ALPHA: f64 = 1.0;
pub const PRIOR_BETA: f64 = 1.0;

/// Divisor guard when a batch reports revenue against zero cost.
const ROAS_EPSILON: f64 = 1e-9;

/// Posterior state for a single arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmPosterior {
    pub arm_id: i64,
    pub alpha: f64,
    pub beta: f64,
    /// Cumulative cost charged to the arm.
    pub spend: f64,
    /// Trial-weighted running sum of ROAS observations.
    pub reward_sum: f64,
    /// Trial-weighted running sum of squared ROAS observations.
    pub reward_sq_sum: f64,
    /// Trial count; equals `alpha + beta - 2` for observation-only posteriors.
    pub trials: u64,
    pub updated_at: DateTime<Utc>,
}

impl ArmPosterior {
    /// Fresh posterior at the uniform prior.
    pub fn new(arm_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            arm_id,
            alpha: PRIOR_ALPHA,
            beta: PRIOR_BETA,
            spend: 0.0,
            reward_sum: 0.0,
            reward_sq_sum: 0.0,
            trials: 0,
            updated_at: now,
        }
    }

    /// Trial-weighted mean ROAS; zero before any observation.
    pub fn mean_reward(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.trials as f64;
        self.reward_sum / n
    }

    /// Trial-weighted reward variance; zero before any observation.
    pub fn reward_variance(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.trials as f64;
        let mean = self.reward_sum / n;
        (self.reward_sq_sum / n - mean * mean).max(0.0)
    }

    /// Risk score in `[0, 1]` relative to a variance ceiling.
    pub fn risk_score(&self, variance_limit: f64) -> f64 {
        if variance_limit <= 0.0 {
            return if self.reward_variance() > 0.0 { 1.0 } else { 0.0 };
        }
        (self.reward_variance() / variance_limit).min(1.0)
    }

    /// Apply an observation batch.
    pub fn apply(&mut self, update: &PosteriorUpdate, now: DateTime<Utc>) {
        self.alpha += update.successes;
        self.beta += update.failures;
        self.spend += update.cost;
        let t = update.successes + update.failures;
        if t > 0.0 {
            let roas = update.roas();
            self.reward_sum += roas * t;
            self.reward_sq_sum += roas * roas * t;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.trials += t.round() as u64;
            }
        }
        self.updated_at = now;
    }

    /// Reverse a previously applied observation batch.
    ///
    /// Used when an authoritative poll row supersedes a webhook hint that
    /// was already folded in. Clamps at the prior so the invariants
    /// `alpha, beta >= 1` survive even a mismatched retraction.
    pub fn retract(&mut self, update: &PosteriorUpdate, now: DateTime<Utc>) {
        self.alpha = (self.alpha - update.successes).max(PRIOR_ALPHA);
        self.beta = (self.beta - update.failures).max(PRIOR_BETA);
        self.spend = (self.spend - update.cost).max(0.0);
        let t = update.successes + update.failures;
        if t > 0.0 {
            let roas = update.roas();
            self.reward_sum = (self.reward_sum - roas * t).max(0.0);
            self.reward_sq_sum = (self.reward_sq_sum - roas * roas * t).max(0.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.trials = self.trials.saturating_sub(t.round() as u64);
            }
        }
        self.updated_at = now;
    }
}

/// Delta extracted from one or more metric rows, ready to fold into a
/// posterior. Batching merges updates per arm to amortize lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PosteriorUpdate {
    pub successes: f64,
    pub failures: f64,
    pub cost: f64,
    pub revenue: f64,
}

impl PosteriorUpdate {
    /// Build from a metric row, capping trials per cycle.
    ///
    /// When clicks exceed the cap, successes and failures are scaled
    /// proportionally so the Beta cannot run away on a single burst.
    pub fn from_metric(metric: &Metric, max_trials_per_cycle: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let clicks = metric.clicks as f64;
        #[allow(clippy::cast_precision_loss)]
        let conversions = metric.conversions as f64;
        let (successes, failures) = if max_trials_per_cycle > 0
            && metric.clicks > max_trials_per_cycle
        {
            #[allow(clippy::cast_precision_loss)]
            let scale = max_trials_per_cycle as f64 / clicks;
            (conversions * scale, (clicks - conversions) * scale)
        } else {
            (conversions, clicks - conversions)
        };
        Self {
            successes,
            failures,
            cost: metric.cost,
            revenue: metric.revenue,
        }
    }

    /// Fold another batch into this one.
    pub fn merge(&mut self, other: &Self) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.cost += other.cost;
        self.revenue += other.revenue;
    }

    /// Observed ROAS for the batch. Zero cost with zero revenue is a
    /// legitimate no-spend window and yields zero.
    pub fn roas(&self) -> f64 {
        if self.cost <= 0.0 {
            if self.revenue > 0.0 {
                return self.revenue / ROAS_EPSILON.max(self.cost);
            }
            return 0.0;
        }
        self.revenue / self.cost
    }

    pub fn is_empty(&self) -> bool {
        self.successes == 0.0 && self.failures == 0.0 && self.cost == 0.0 && self.revenue == 0.0
    }
}
