//! Webhook surface tests: signature enforcement, malformed payloads,
//! idempotent intake, and the out-of-cycle posterior update path.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tower::ServiceExt;

use adbandit::domain::models::MetricSource;
use adbandit::services::webhook::{router, sign_payload, WebhookState};
use adbandit::services::{ArmIndex, MetricIngestor, PosteriorStore};

use common::{ingestor_over, repos, seed_campaign, store_over, test_db, Repos};

const SECRET: &str = "hunter2-rotate-quarterly";

async fn webhook_setup(
    repos: &Repos,
) -> (axum::Router, Arc<PosteriorStore>, Arc<MetricIngestor>, String) {
    let (_, arms) = seed_campaign(&repos.campaigns, "hooked", 10_000.0, &[("search", "a")]).await;
    let arm = repos
        .campaigns
        .get_arm(arms["a"])
        .await
        .expect("get arm")
        .expect("arm");

    let store = store_over(repos);
    let ingestor = ingestor_over(store.clone());
    let index = ArmIndex::load(&repos.campaigns).await.expect("index");

    let mut secrets = HashMap::new();
    secrets.insert("mock".to_string(), SECRET.to_string());
    let state = WebhookState::new(
        ingestor.clone(),
        Arc::new(RwLock::new(index)),
        secrets,
        HashMap::new(),
    );
    (router(state), store, ingestor, arm.arm_key())
}

fn event_body(arm_key: &str, ts: DateTime<Utc>) -> String {
    serde_json::json!({
        "events": [{
            "arm_key": arm_key,
            "ts": ts.to_rfc3339(),
            "impressions": 1000,
            "clicks": 100,
            "conversions": 5,
            "cost": 50.0,
            "revenue": 120.0,
        }]
    })
    .to_string()
}

fn signed_request(path: &str, body: &str, secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-webhook-signature", sign_payload(secret, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// The same signed payload three times produces one metric row and
/// one posterior update.
#[tokio::test]
async fn test_webhook_intake_is_idempotent() {
    let harness = test_db().await;
    let repos = repos(&harness.db);
    let (app, store, _ingestor, arm_key) = webhook_setup(&repos).await;

    let ts = Utc::now() - ChronoDuration::minutes(5);
    let body = event_body(&arm_key, ts);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(signed_request("/webhook/mock", &body, SECRET))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let arm = repos
        .campaigns
        .find_arm_by_key(1, &arm_key)
        .await
        .expect("find")
        .expect("arm");

    // Exactly one stored row for (arm, ts, webhook).
    let rows = repos
        .metrics
        .range(arm.id, ts - ChronoDuration::minutes(1), ts + ChronoDuration::minutes(1))
        .await
        .expect("range");
    let webhook_rows: Vec<_> = rows
        .iter()
        .filter(|m| m.source == MetricSource::Webhook)
        .collect();
    assert_eq!(webhook_rows.len(), 1);

    // ROAS 2.4 against an empty posterior clears the hint threshold, so
    // the posterior updated out-of-cycle -- exactly once.
    let posterior = store
        .get_posterior(arm.id)
        .await
        .expect("posterior")
        .expect("exists");
    assert_eq!(posterior.trials, 100);
    assert!((posterior.alpha - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let harness = test_db().await;
    let repos = repos(&harness.db);
    let (app, _store, _ingestor, arm_key) = webhook_setup(&repos).await;

    let body = event_body(&arm_key, Utc::now());

    // Wrong key.
    let response = app
        .clone()
        .oneshot(signed_request("/webhook/mock", &body, "wrong-secret"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Missing header entirely.
    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhook/mock")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request");
    let response = app.clone().oneshot(unsigned).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_rejects_malformed_payload() {
    let harness = test_db().await;
    let repos = repos(&harness.db);
    let (app, _store, _ingestor, _arm_key) = webhook_setup(&repos).await;

    let body = r#"{"not_events": true}"#;
    let response = app
        .clone()
        .oneshot(signed_request("/webhook/mock", body, SECRET))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_unknown_platform_is_not_found() {
    let harness = test_db().await;
    let repos = repos(&harness.db);
    let (app, _store, _ingestor, arm_key) = webhook_setup(&repos).await;

    let body = event_body(&arm_key, Utc::now());
    let response = app
        .clone()
        .oneshot(signed_request("/webhook/doubleclick", &body, SECRET))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_events_for_unknown_arms_are_skipped() {
    let harness = test_db().await;
    let repos = repos(&harness.db);
    let (app, store, _ingestor, _arm_key) = webhook_setup(&repos).await;

    let body = event_body("mock:search:ghost:9.9999", Utc::now());
    let response = app
        .clone()
        .oneshot(signed_request("/webhook/mock", &body, SECRET))
        .await
        .expect("response");

    // Accepted at the HTTP layer, but nothing lands in the store.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(store.get_posterior(999).await.expect("read").is_none());
}
