//! Signed webhook intake.
//!
//! Platforms push near-real-time metrics to `POST /webhook/{platform}`.
//! Signature verification over the raw body is a hard precondition:
//! unsigned or mis-signed payloads get 401 and are counted, malformed
//! bodies get 400, and intake backpressure surfaces as 503. Each
//! platform's payload is decoded into typed records by its decoder and
//! mapped into canonical metrics before touching the core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::{Metric, MetricQuality, MetricSource};
use crate::services::ingest::{ArmIndex, IngestError, MetricIngestor, Submitted};

type HmacSha256 = Hmac<Sha256>;

/// Decodes one platform's webhook body into `(arm_key, metric)` pairs.
///
/// Implementations own the payload schema; nothing platform-shaped
/// leaks past this trait.
pub trait WebhookDecoder: Send + Sync {
    /// Header carrying the hex HMAC-SHA256 signature.
    fn signature_header(&self) -> &'static str {
        "x-webhook-signature"
    }

    /// Parse the raw body into keyed metric windows.
    fn decode(&self, body: &[u8]) -> Result<Vec<KeyedMetric>, String>;
}

/// One decoded metric window, addressed by arm key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedMetric {
    pub arm_key: String,
    pub ts: DateTime<Utc>,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,
}

/// Typed record for the default REST-platform payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RestWebhookEvent {
    arm_key: String,
    ts: DateTime<Utc>,
    #[serde(default)]
    impressions: u64,
    #[serde(default)]
    clicks: u64,
    #[serde(default)]
    conversions: u64,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RestWebhookPayload {
    events: Vec<RestWebhookEvent>,
}

/// Decoder for the generic REST platform payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestWebhookDecoder;

impl WebhookDecoder for RestWebhookDecoder {
    fn decode(&self, body: &[u8]) -> Result<Vec<KeyedMetric>, String> {
        let payload: RestWebhookPayload =
            serde_json::from_slice(body).map_err(|e| e.to_string())?;
        Ok(payload
            .events
            .into_iter()
            .map(|e| KeyedMetric {
                arm_key: e.arm_key,
                ts: e.ts,
                impressions: e.impressions,
                clicks: e.clicks,
                conversions: e.conversions,
                cost: e.cost,
                revenue: e.revenue,
            })
            .collect())
    }
}

/// Shared state behind the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    ingestor: Arc<MetricIngestor>,
    index: Arc<RwLock<ArmIndex>>,
    /// Webhook secret per platform name.
    secrets: Arc<HashMap<String, String>>,
    decoders: Arc<HashMap<String, Arc<dyn WebhookDecoder>>>,
    /// Count of rejected signatures.
    rejected_signatures: Arc<AtomicU64>,
}

impl WebhookState {
    pub fn new(
        ingestor: Arc<MetricIngestor>,
        index: Arc<RwLock<ArmIndex>>,
        secrets: HashMap<String, String>,
        decoders: HashMap<String, Arc<dyn WebhookDecoder>>,
    ) -> Self {
        Self {
            ingestor,
            index,
            secrets: Arc::new(secrets),
            decoders: Arc::new(decoders),
            rejected_signatures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn rejected_signatures(&self) -> u64 {
        self.rejected_signatures.load(Ordering::Relaxed)
    }
}

/// Accepted-intake summary returned on 200.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IntakeSummary {
    pub accepted: u64,
    pub out_of_cycle: u64,
    pub duplicates: u64,
    pub flagged: u64,
    pub unknown_arms: u64,
}

/// Build the webhook router.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/:platform", post(handle_webhook))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Hex HMAC-SHA256 of a body; used by platforms (and tests) to sign.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts any key length; the error arm is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    match hex::decode(signature_hex.trim()) {
        Ok(signature) => mac.verify_slice(&signature).is_ok(),
        Err(_) => false,
    }
}

async fn handle_webhook(
    Path(platform): Path<String>,
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.secrets.get(&platform) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let decoder: Arc<dyn WebhookDecoder> = state
        .decoders
        .get(&platform)
        .cloned()
        .unwrap_or_else(|| Arc::new(RestWebhookDecoder));

    let signature = headers
        .get(decoder.signature_header())
        .and_then(|v| v.to_str().ok());
    let verified = signature.is_some_and(|sig| verify_signature(secret, &body, sig));
    if !verified {
        state.rejected_signatures.fetch_add(1, Ordering::Relaxed);
        warn!(platform, "webhook rejected: bad or missing signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let events = match decoder.decode(&body) {
        Ok(events) => events,
        Err(e) => {
            debug!(platform, error = %e, "webhook rejected: malformed payload");
            return (StatusCode::BAD_REQUEST, e).into_response();
        }
    };

    let mut summary = IntakeSummary::default();
    let index = state.index.read().await;
    for event in events {
        let Some(arm) = index.resolve_key(&event.arm_key) else {
            summary.unknown_arms += 1;
            debug!(platform, arm_key = %event.arm_key, "webhook event for unknown arm");
            continue;
        };
        if arm.platform != platform {
            summary.unknown_arms += 1;
            continue;
        }

        let metric = Metric {
            arm_id: arm.id,
            ts: event.ts,
            source: MetricSource::Webhook,
            impressions: event.impressions,
            clicks: event.clicks,
            conversions: event.conversions,
            cost: event.cost,
            revenue: event.revenue,
            quality: MetricQuality::Ok,
        };

        match state.ingestor.submit(arm.campaign_id, metric).await {
            Ok(Submitted::Queued) => summary.accepted += 1,
            Ok(Submitted::OutOfCycle) => {
                summary.accepted += 1;
                summary.out_of_cycle += 1;
            }
            Ok(Submitted::Duplicate) => summary.duplicates += 1,
            Ok(Submitted::Flagged) => summary.flagged += 1,
            Err(IngestError::QueueFull(_)) => {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            Err(IngestError::Validation(e)) => {
                return (StatusCode::BAD_REQUEST, e).into_response();
            }
            Err(e) => {
                warn!(platform, error = %e, "webhook intake failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    (StatusCode::OK, Json(summary)).into_response()
}

/// Serve the webhook router until the shutdown signal fires.
pub async fn serve(
    bind_addr: &str,
    state: WebhookState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = bind_addr, "webhook server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_round_trip() {
        let body = br#"{"events":[]}"#;
        let sig = sign_payload("topsecret", body);
        assert!(verify_signature("topsecret", body, &sig));
        assert!(!verify_signature("wrong", body, &sig));
        assert!(!verify_signature("topsecret", b"tampered", &sig));
    }

    #[test]
    fn test_verify_rejects_non_hex() {
        assert!(!verify_signature("s", b"body", "zz-not-hex"));
        assert!(!verify_signature("s", b"body", ""));
    }

    #[test]
    fn test_rest_decoder_parses_events() {
        let body = br#"{"events":[{"arm_key":"p:c:x:1.0000","ts":"2026-04-01T00:00:00Z","impressions":100,"clicks":10,"conversions":1,"cost":5.0,"revenue":12.0}]}"#;
        let events = RestWebhookDecoder.decode(body).expect("decode");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].arm_key, "p:c:x:1.0000");
        assert_eq!(events[0].clicks, 10);
    }

    #[test]
    fn test_rest_decoder_rejects_malformed() {
        assert!(RestWebhookDecoder.decode(b"not json").is_err());
        assert!(RestWebhookDecoder.decode(br#"{"rows":[]}"#).is_err());
    }
}
