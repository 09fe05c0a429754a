//! Bandit decision core.
//!
//! Pure: no I/O, no clock, no global RNG. Given a campaign, its arms and
//! posteriors, and a per-cycle context, `decide` produces the next
//! allocation vector plus the change records that explain it. The RNG is
//! seeded from `(campaign id, cycle tick)` so any cycle can be replayed
//! bit-for-bit.
//!
//! Pipeline per arm: Thompson sample -> risk discount -> MMM multipliers
//! -> normalize -> exploration floor -> step clip -> budget scale. Each
//! stage's contribution is logged as the log-ratio between successive
//! values.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::domain::models::{
    AllocationChange, Arm, ArmPosterior, Campaign, ChangeReason, InitiatedBy,
};
use crate::domain::ports::BanditAgent;
use crate::services::mmm::MmmView;

/// Guard for log-ratio factors over near-zero values.
const LN_FLOOR: f64 = 1e-12;

/// Exploration penalty for high-variance arms that have not yet cleared
/// the trial gate. A discount, not an exclusion: the arm keeps getting
/// traffic to learn from.
const RISK_GATE_PENALTY: f64 = 0.5;

/// Deterministic RNG seed for one campaign cycle.
///
/// splitmix64 over the pair; stable across platforms and releases, unlike
/// the std hasher.
pub fn cycle_seed(campaign_id: i64, cycle_tick: u64) -> u64 {
    #[allow(clippy::cast_sign_loss)]
    let mut z = (campaign_id as u64)
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(cycle_tick);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Algorithm tunables, resolved from engine config.
#[derive(Debug, Clone, Copy)]
pub struct DecisionParams {
    pub min_trials_for_risk_gate: u64,
    pub max_step: f64,
    pub min_alloc_floor: f64,
    pub report_threshold: f64,
}

/// Per-cycle inputs assembled by the scheduler.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub now: DateTime<Utc>,
    pub cycle_tick: u64,
    /// Cumulative spend across the campaign's arms.
    pub spent: f64,
    /// Expected spend over the next cadence at the new allocation.
    pub projected_cycle_spend: f64,
    /// Last applied allocation per arm; absent arms default to the
    /// uniform share.
    pub old_allocations: HashMap<i64, f64>,
    pub mmm: MmmView,
}

/// Output of one decision cycle.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Normalized allocation per enabled arm; sums to 1.
    pub allocations: BTreeMap<i64, f64>,
    /// Budget scaling applied on top of the normalized vector; 1.0 when
    /// the budget is not binding, 0.0 when exhausted.
    pub spend_scale: f64,
    /// The campaign's budget is exhausted; no further cycles.
    pub completed: bool,
    pub changes: Vec<AllocationChange>,
}

struct ArmScore<'a> {
    arm: &'a Arm,
    theta: f64,
    risk_ln: f64,
    seasonality: f64,
    carryover: f64,
    score: f64,
    snapshot: serde_json::Value,
}

/// Run one decision cycle. Pure and deterministic for a given seed.
pub fn decide(
    campaign: &Campaign,
    arms: &[Arm],
    posteriors: &HashMap<i64, ArmPosterior>,
    agent: &dyn BanditAgent,
    ctx: &DecisionContext,
    params: &DecisionParams,
) -> Decision {
    let mut enabled: Vec<&Arm> = arms.iter().filter(|a| !a.disabled).collect();
    // Lexicographic arm-key order fixes both the sampling sequence and
    // tie-breaks.
    enabled.sort_by(|a, b| a.arm_key().cmp(&b.arm_key()));

    let remaining = campaign.total_budget - ctx.spent;
    if enabled.is_empty() {
        return Decision {
            allocations: BTreeMap::new(),
            spend_scale: 1.0,
            completed: remaining <= 0.0,
            changes: Vec::new(),
        };
    }

    #[allow(clippy::cast_precision_loss)]
    let uniform = 1.0 / enabled.len() as f64;
    let mut rng = ChaCha8Rng::seed_from_u64(cycle_seed(campaign.id, ctx.cycle_tick));

    // Stages 1-3: sample, risk-discount, MMM-adjust.
    let mut scored: Vec<ArmScore> = Vec::with_capacity(enabled.len());
    let default_posterior = |arm_id: i64| ArmPosterior::new(arm_id, ctx.now);
    for &arm in &enabled {
        let owned;
        let posterior = match posteriors.get(&arm.id) {
            Some(p) => p,
            None => {
                owned = default_posterior(arm.id);
                &owned
            }
        };

        let theta = agent.sample(posterior, &mut rng);
        let variance = posterior.reward_variance();
        let risk = posterior.risk_score(campaign.variance_limit);
        let mut risk_multiplier = 1.0 - campaign.risk_tolerance * risk;
        if variance > campaign.variance_limit && posterior.trials < params.min_trials_for_risk_gate
        {
            risk_multiplier *= RISK_GATE_PENALTY;
        }

        let channel = ctx.mmm.channel(&arm.channel);
        let score =
            theta * risk_multiplier * channel.seasonality * channel.carryover
                * ctx.mmm.external_product();

        scored.push(ArmScore {
            arm,
            theta,
            risk_ln: risk_multiplier.max(LN_FLOOR).ln(),
            seasonality: channel.seasonality,
            carryover: channel.carryover,
            score,
            snapshot: serde_json::json!({
                "alpha": posterior.alpha,
                "beta": posterior.beta,
                "trials": posterior.trials,
                "mean_reward": posterior.mean_reward(),
                "reward_variance": variance,
                "spend": posterior.spend,
            }),
        });
    }

    // Stage 4a: normalize, with uniform fallback when every arm was
    // penalized to zero.
    let total: f64 = scored.iter().map(|s| s.score).sum();
    let mut allocs: Vec<f64> = if total > 0.0 && total.is_finite() {
        scored.iter().map(|s| s.score / total).collect()
    } else {
        vec![uniform; scored.len()]
    };

    // Stage 4b: exploration floor. Floored arms are pinned and the free
    // mass redistributed so the floor survives renormalization.
    apply_floor(&mut allocs, params.min_alloc_floor);

    // Stage 4c: per-arm step bound against the previous allocation, then
    // renormalize. The renormalization may nudge an arm slightly past its
    // bound; the bound's purpose is damping, not a hard cap.
    let pre_clip = allocs.clone();
    for (i, s) in scored.iter().enumerate() {
        let old = ctx
            .old_allocations
            .get(&s.arm.id)
            .copied()
            .unwrap_or(uniform);
        allocs[i] = allocs[i].clamp((old - params.max_step).max(0.0), old + params.max_step);
    }
    normalize(&mut allocs);

    // Stage 5: budget projection.
    let (spend_scale, completed) = if remaining <= 0.0 {
        (0.0, true)
    } else if ctx.projected_cycle_spend > 0.0
        && ctx.spent + ctx.projected_cycle_spend >= campaign.total_budget
    {
        ((remaining / ctx.projected_cycle_spend).min(1.0), false)
    } else {
        (1.0, false)
    };
    let budget_scale_ln = spend_scale.max(LN_FLOOR).ln();

    // Stage 6: emit changes for every arm that moved noticeably.
    let mut changes = Vec::new();
    let mut allocations = BTreeMap::new();
    let reason = if completed {
        ChangeReason::Completed
    } else if spend_scale < 1.0 {
        ChangeReason::BudgetScale
    } else {
        ChangeReason::Decision
    };

    for (i, s) in scored.iter().enumerate() {
        let old = ctx
            .old_allocations
            .get(&s.arm.id)
            .copied()
            .unwrap_or(uniform);
        let new_alloc = allocs[i] * spend_scale;
        allocations.insert(s.arm.id, allocs[i]);

        if (new_alloc - old).abs() < params.report_threshold {
            continue;
        }

        let mut factors = BTreeMap::new();
        factors.insert("thompson".to_string(), s.theta.max(LN_FLOOR).ln());
        factors.insert("risk".to_string(), s.risk_ln);
        factors.insert(
            "mmm_seasonality".to_string(),
            s.seasonality.max(LN_FLOOR).ln(),
        );
        factors.insert("mmm_carryover".to_string(), s.carryover.max(LN_FLOOR).ln());
        factors.insert(
            "step_clip".to_string(),
            (allocs[i].max(LN_FLOOR) / pre_clip[i].max(LN_FLOOR)).ln(),
        );
        factors.insert("budget_scale".to_string(), budget_scale_ln);

        let mut mmm_factors = BTreeMap::new();
        mmm_factors.insert(
            "seasonality".to_string(),
            s.seasonality.max(LN_FLOOR).ln(),
        );
        mmm_factors.insert("carryover".to_string(), s.carryover.max(LN_FLOOR).ln());
        for (name, multiplier) in &ctx.mmm.external {
            mmm_factors.insert(name.clone(), multiplier.max(LN_FLOOR).ln());
        }

        changes.push(AllocationChange {
            id: 0,
            campaign_id: campaign.id,
            arm_id: s.arm.id,
            ts: ctx.now,
            old_alloc: old,
            new_alloc,
            reason: reason.clone(),
            factors,
            mmm_factors,
            initiated_by: InitiatedBy::Auto,
            state_snapshot: s.snapshot.clone(),
        });
    }

    // Disabled arms that still carried allocation get an explicit zeroing
    // record so the ledger stays reachable step by step.
    for arm in arms.iter().filter(|a| a.disabled) {
        let old = ctx.old_allocations.get(&arm.id).copied().unwrap_or(0.0);
        if old.abs() >= params.report_threshold {
            changes.push(AllocationChange {
                id: 0,
                campaign_id: campaign.id,
                arm_id: arm.id,
                ts: ctx.now,
                old_alloc: old,
                new_alloc: 0.0,
                reason: ChangeReason::Decision,
                factors: BTreeMap::new(),
                mmm_factors: BTreeMap::new(),
                initiated_by: InitiatedBy::Auto,
                state_snapshot: serde_json::json!({"disabled": true}),
            });
        }
    }

    Decision {
        allocations,
        spend_scale,
        completed,
        changes,
    }
}

/// Pin every allocation to at least `floor` while keeping the vector
/// normalized. Pinning one arm can push another below the floor, so
/// iterate; each pass pins at least one more arm, bounding the loop by
/// the arm count.
fn apply_floor(allocs: &mut [f64], floor: f64) {
    #[allow(clippy::cast_precision_loss)]
    let n = allocs.len() as f64;
    if floor <= 0.0 || allocs.is_empty() || floor * n >= 1.0 {
        return;
    }

    let mut pinned = vec![false; allocs.len()];
    for _ in 0..allocs.len() {
        let mut newly_pinned = false;
        for (i, a) in allocs.iter_mut().enumerate() {
            if !pinned[i] && *a < floor {
                *a = floor;
                pinned[i] = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            break;
        }

        #[allow(clippy::cast_precision_loss)]
        let pinned_mass = floor * pinned.iter().filter(|p| **p).count() as f64;
        let free_mass: f64 = allocs
            .iter()
            .zip(&pinned)
            .filter(|(_, p)| !**p)
            .map(|(a, _)| *a)
            .sum();
        if free_mass <= 0.0 {
            break;
        }
        let scale = (1.0 - pinned_mass) / free_mass;
        for (a, p) in allocs.iter_mut().zip(&pinned) {
            if !*p {
                *a *= scale;
            }
        }
    }
}

fn normalize(allocs: &mut [f64]) {
    let total: f64 = allocs.iter().sum();
    if total > 0.0 && total.is_finite() {
        for a in allocs.iter_mut() {
            *a /= total;
        }
    } else if !allocs.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let uniform = 1.0 / allocs.len() as f64;
        for a in allocs.iter_mut() {
            *a = uniform;
        }
    }
}
