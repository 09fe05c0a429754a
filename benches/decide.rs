//! Decision-core latency benchmark.
//!
//! The cycle budget is 100ms for a campaign with up to 1000 arms; the
//! decision core must stay comfortably inside it since it never
//! suspends.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use adbandit::domain::models::{
    Arm, ArmPosterior, Campaign, CampaignStatus, PosteriorUpdate, PrimaryKpi,
};
use adbandit::services::{decide, DecisionContext, DecisionParams, MmmView, ThompsonBernoulli};

fn setup(n_arms: i64) -> (Campaign, Vec<Arm>, HashMap<i64, ArmPosterior>) {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let campaign = Campaign {
        id: 1,
        name: "bench".to_string(),
        total_budget: 1_000_000.0,
        start: now,
        end: None,
        status: CampaignStatus::Active,
        primary_kpi: PrimaryKpi::Roas,
        risk_tolerance: 0.5,
        variance_limit: 4.0,
        cadence_ms: 900_000,
    };

    let mut arms = Vec::new();
    let mut posteriors = HashMap::new();
    for id in 0..n_arms {
        arms.push(Arm {
            id,
            campaign_id: 1,
            platform: "p".to_string(),
            channel: if id % 2 == 0 { "search" } else { "video" }.to_string(),
            creative: format!("creative-{id:04}"),
            bid: 1.0,
            disabled: false,
        });
        let mut p = ArmPosterior::new(id, now);
        p.apply(
            &PosteriorUpdate {
                successes: (id % 50) as f64,
                failures: 1000.0,
                cost: 50.0,
                revenue: 100.0,
            },
            now,
        );
        posteriors.insert(id, p);
    }
    (campaign, arms, posteriors)
}

fn bench_decide(c: &mut Criterion) {
    let agent = ThompsonBernoulli;
    let params = DecisionParams {
        min_trials_for_risk_gate: 100,
        max_step: 0.1,
        min_alloc_floor: 0.0001,
        report_threshold: 1e-4,
    };

    let mut group = c.benchmark_group("decide");
    for n_arms in [10i64, 100, 1000] {
        let (campaign, arms, posteriors) = setup(n_arms);
        let ctx = DecisionContext {
            now: Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap(),
            cycle_tick: 42,
            spent: 0.0,
            projected_cycle_spend: 0.0,
            old_allocations: HashMap::new(),
            mmm: MmmView::default(),
        };
        group.bench_with_input(BenchmarkId::from_parameter(n_arms), &n_arms, |b, _| {
            b.iter(|| {
                black_box(decide(
                    black_box(&campaign),
                    black_box(&arms),
                    black_box(&posteriors),
                    &agent,
                    black_box(&ctx),
                    &params,
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decide);
criterion_main!(benches);
