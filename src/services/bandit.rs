//! Thompson-sampling Bernoulli bandit.
//!
//! The default `BanditAgent`: samples success probabilities from each
//! arm's Beta posterior and folds observation batches back in. Callers
//! own the RNG so decisions replay exactly under a fixed seed.

use chrono::{DateTime, Utc};
use rand::distributions::Distribution;
use statrs::distribution::Beta;
use tracing::warn;

use crate::domain::models::{ArmPosterior, PosteriorUpdate};
use crate::domain::ports::{BanditAgent, BanditSnapshot};

/// Bernoulli Thompson sampler over Beta posteriors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThompsonBernoulli;

impl ThompsonBernoulli {
    pub fn new() -> Self {
        Self
    }
}

impl BanditAgent for ThompsonBernoulli {
    fn sample(&self, posterior: &ArmPosterior, rng: &mut dyn rand::RngCore) -> f64 {
        match Beta::new(posterior.alpha, posterior.beta) {
            Ok(dist) => dist.sample(rng),
            Err(e) => {
                // Unreachable while alpha, beta >= 1 holds; degrade to the
                // posterior mean rather than poisoning the cycle.
                warn!(arm_id = posterior.arm_id, error = %e, "invalid Beta parameters");
                posterior.alpha / (posterior.alpha + posterior.beta)
            }
        }
    }

    fn update(
        &self,
        posterior: &mut ArmPosterior,
        update: &PosteriorUpdate,
        now: DateTime<Utc>,
    ) {
        posterior.apply(update, now);
    }

    fn snapshot(&self, posterior: &ArmPosterior) -> BanditSnapshot {
        let a = posterior.alpha;
        let b = posterior.beta;
        let total = a + b;
        BanditSnapshot {
            mean: a / total,
            variance: a * b / (total * total * (total + 1.0)),
            trials: posterior.trials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_fresh_arm_samples_uniform() {
        let agent = ThompsonBernoulli::new();
        let posterior = ArmPosterior::new(1, Utc::now());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        // Beta(1,1) is Uniform(0,1): samples stay in range and spread out.
        let samples: Vec<f64> = (0..1000)
            .map(|_| agent.sample(&posterior, &mut rng))
            .collect();
        assert!(samples.iter().all(|s| (0.0..=1.0).contains(s)));
        let mean = samples.iter().sum::<f64>() / 1000.0;
        assert!((mean - 0.5).abs() < 0.05, "uniform mean should be near 0.5, got {mean}");
    }

    #[test]
    fn test_sampling_is_deterministic_under_seed() {
        let agent = ThompsonBernoulli::new();
        let mut posterior = ArmPosterior::new(1, Utc::now());
        posterior.alpha = 12.0;
        posterior.beta = 40.0;

        let mut rng_a = ChaCha8Rng::seed_from_u64(42);
        let mut rng_b = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..32 {
            assert_eq!(
                agent.sample(&posterior, &mut rng_a).to_bits(),
                agent.sample(&posterior, &mut rng_b).to_bits()
            );
        }
    }

    #[test]
    fn test_concentrated_posterior_samples_near_mean() {
        let agent = ThompsonBernoulli::new();
        let mut posterior = ArmPosterior::new(1, Utc::now());
        posterior.alpha = 5000.0;
        posterior.beta = 95000.0;

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sample = agent.sample(&posterior, &mut rng);
        assert!((sample - 0.05).abs() < 0.01);
    }

    #[test]
    fn test_snapshot_matches_beta_moments() {
        let agent = ThompsonBernoulli::new();
        let mut posterior = ArmPosterior::new(1, Utc::now());
        posterior.alpha = 3.0;
        posterior.beta = 7.0;

        let snap = agent.snapshot(&posterior);
        assert!((snap.mean - 0.3).abs() < 1e-12);
        // Var[Beta(3,7)] = 21 / (100 * 11)
        assert!((snap.variance - 21.0 / 1100.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_delegates_to_posterior() {
        let agent = ThompsonBernoulli::new();
        let mut posterior = ArmPosterior::new(1, Utc::now());
        let update = PosteriorUpdate {
            successes: 5.0,
            failures: 95.0,
            cost: 50.0,
            revenue: 100.0,
        };
        agent.update(&mut posterior, &update, Utc::now());
        assert!((posterior.alpha - 6.0).abs() < 1e-12);
        assert!((posterior.beta - 96.0).abs() < 1e-12);
        assert_eq!(posterior.trials, 100);
    }
}
