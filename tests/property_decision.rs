//! Property-based invariants of the decision core and posterior
//! arithmetic.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use adbandit::domain::models::{
    Arm, ArmPosterior, Campaign, CampaignStatus, PosteriorUpdate, PrimaryKpi, PRIOR_ALPHA,
    PRIOR_BETA,
};
use adbandit::services::{decide, DecisionContext, DecisionParams, MmmView, ThompsonBernoulli};

fn campaign(budget: f64, risk_tolerance: f64, variance_limit: f64) -> Campaign {
    Campaign {
        id: 7,
        name: "prop".to_string(),
        total_budget: budget,
        start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        end: None,
        status: CampaignStatus::Active,
        primary_kpi: PrimaryKpi::Roas,
        risk_tolerance,
        variance_limit,
        cadence_ms: 900_000,
    }
}

fn arm(id: i64) -> Arm {
    Arm {
        id,
        campaign_id: 7,
        platform: "p".to_string(),
        channel: "search".to_string(),
        creative: format!("c{id:03}"),
        bid: 1.0,
        disabled: false,
    }
}

fn params() -> DecisionParams {
    DecisionParams {
        min_trials_for_risk_gate: 100,
        max_step: 0.1,
        min_alloc_floor: 0.01,
        report_threshold: 1e-4,
    }
}

fn ctx(tick: u64) -> DecisionContext {
    DecisionContext {
        now: Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap(),
        cycle_tick: tick,
        spent: 0.0,
        projected_cycle_spend: 0.0,
        old_allocations: HashMap::new(),
        mmm: MmmView::default(),
    }
}

/// Observation batch drawn from integer counts, so the Beta identity is
/// exact.
fn batch_strategy() -> impl Strategy<Value = PosteriorUpdate> {
    (0u32..200, 0u32..2000, 0.0f64..100.0, 0.0f64..300.0).prop_map(
        |(successes, failures, cost, revenue)| PosteriorUpdate {
            successes: f64::from(successes),
            failures: f64::from(failures),
            cost,
            revenue,
        },
    )
}

fn posteriors_strategy(
    n_arms: usize,
) -> impl Strategy<Value = Vec<Vec<PosteriorUpdate>>> {
    prop::collection::vec(prop::collection::vec(batch_strategy(), 0..5), n_arms..=n_arms)
}

proptest! {
    /// After any decision, the normalized allocation vector sums to 1.
    #[test]
    fn prop_allocations_sum_to_one(
        n_arms in 1usize..12,
        tick in 0u64..10_000,
        risk_tolerance in 0.0f64..=1.0,
        batches in (1usize..12).prop_flat_map(posteriors_strategy),
    ) {
        let agent = ThompsonBernoulli;
        let arms: Vec<Arm> = (0..n_arms as i64).map(arm).collect();
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();

        let mut posteriors = HashMap::new();
        for (i, arm_batches) in batches.iter().take(n_arms).enumerate() {
            let mut p = ArmPosterior::new(i as i64, now);
            for b in arm_batches {
                p.apply(b, now);
            }
            posteriors.insert(i as i64, p);
        }

        let c = campaign(1_000_000.0, risk_tolerance, 4.0);
        let dec = decide(&c, &arms, &posteriors, &agent, &ctx(tick), &params());

        let total: f64 = dec.allocations.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
        prop_assert_eq!(dec.allocations.len(), n_arms);
        for alloc in dec.allocations.values() {
            prop_assert!(*alloc >= 0.0 && *alloc <= 1.0);
        }
    }

    /// Same snapshot, same tick: bit-identical allocations.
    #[test]
    fn prop_decide_is_deterministic(
        n_arms in 1usize..8,
        tick in 0u64..10_000,
    ) {
        let agent = ThompsonBernoulli;
        let arms: Vec<Arm> = (0..n_arms as i64).map(arm).collect();
        let c = campaign(10_000.0, 0.5, 4.0);

        let a = decide(&c, &arms, &HashMap::new(), &agent, &ctx(tick), &params());
        let b = decide(&c, &arms, &HashMap::new(), &agent, &ctx(tick), &params());

        prop_assert_eq!(a.allocations.len(), b.allocations.len());
        for (arm_id, alloc) in &a.allocations {
            prop_assert_eq!(alloc.to_bits(), b.allocations[arm_id].to_bits());
        }
        prop_assert_eq!(a.changes.len(), b.changes.len());
    }

    /// Posterior parameters never fall below the prior, and the trial
    /// identity alpha + beta - 2 == n holds for observation-only
    /// posteriors.
    #[test]
    fn prop_posterior_invariants(
        batches in prop::collection::vec(batch_strategy(), 0..20),
    ) {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let mut p = ArmPosterior::new(1, now);
        for b in &batches {
            p.apply(b, now);
        }

        prop_assert!(p.alpha >= PRIOR_ALPHA);
        prop_assert!(p.beta >= PRIOR_BETA);
        let n = p.trials as f64;
        prop_assert!(
            ((p.alpha - PRIOR_ALPHA) + (p.beta - PRIOR_BETA) - n).abs() < 1e-6,
            "alpha {} beta {} trials {}", p.alpha, p.beta, p.trials
        );
        prop_assert!(p.reward_variance() >= 0.0);
        prop_assert!(p.risk_score(4.0) >= 0.0 && p.risk_score(4.0) <= 1.0);
    }

    /// With a wide step bound, every enabled arm receives at least the
    /// exploration floor.
    #[test]
    fn prop_floor_is_respected(
        n_arms in 2usize..10,
        tick in 0u64..1_000,
    ) {
        let agent = ThompsonBernoulli;
        let arms: Vec<Arm> = (0..n_arms as i64).map(arm).collect();
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();

        // One dominant arm tries to starve the rest.
        let mut posteriors = HashMap::new();
        let mut dominant = ArmPosterior::new(0, now);
        dominant.apply(
            &PosteriorUpdate { successes: 900.0, failures: 100.0, cost: 10.0, revenue: 30.0 },
            now,
        );
        posteriors.insert(0, dominant);

        let mut prm = params();
        prm.max_step = 1.0;
        let c = campaign(1_000_000.0, 0.0, 1e9);
        let dec = decide(&c, &arms, &posteriors, &agent, &ctx(tick), &prm);

        for (arm_id, alloc) in &dec.allocations {
            prop_assert!(
                *alloc >= prm.min_alloc_floor - 1e-9,
                "arm {arm_id} got {alloc} under floor {}",
                prm.min_alloc_floor
            );
        }
    }

    /// Budget scaling never changes the normalized vector, only the
    /// recorded spend scale.
    #[test]
    fn prop_budget_scale_preserves_normalization(
        n_arms in 1usize..8,
        spent in 0.0f64..1200.0,
        projected in 1.0f64..500.0,
    ) {
        let agent = ThompsonBernoulli;
        let arms: Vec<Arm> = (0..n_arms as i64).map(arm).collect();
        let c = campaign(1_000.0, 0.5, 4.0);

        let mut context = ctx(42);
        context.spent = spent;
        context.projected_cycle_spend = projected;
        let dec = decide(&c, &arms, &HashMap::new(), &agent, &context, &params());

        let total: f64 = dec.allocations.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(dec.spend_scale >= 0.0 && dec.spend_scale <= 1.0);
        if spent >= 1_000.0 {
            prop_assert!(dec.completed);
        }
    }
}
