//! Bandit agent capability.
//!
//! The decision core depends only on this interface; the Thompson
//! Bernoulli sampler is the default implementation and alternative
//! policies (e.g. a contextual LinUCB) plug in behind it.

use chrono::{DateTime, Utc};

use crate::domain::models::{ArmPosterior, PosteriorUpdate};

/// Point-in-time summary of an arm's belief state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BanditSnapshot {
    /// Posterior mean success probability.
    pub mean: f64,
    /// Posterior variance of the success probability.
    pub variance: f64,
    pub trials: u64,
}

/// A bandit policy over per-arm posteriors.
pub trait BanditAgent: Send + Sync {
    /// Draw one score sample for an arm. Callers pass a seeded RNG so a
    /// decision cycle replays exactly.
    fn sample(&self, posterior: &ArmPosterior, rng: &mut dyn rand::RngCore) -> f64;

    /// Fold an observation batch into an arm's posterior.
    fn update(&self, posterior: &mut ArmPosterior, update: &PosteriorUpdate, now: DateTime<Utc>);

    /// Summarize an arm's belief without sampling.
    fn snapshot(&self, posterior: &ArmPosterior) -> BanditSnapshot;
}
