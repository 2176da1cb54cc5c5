use crate::errors::ServiceError;
use crate::events::Event;
use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Creates the router for the gateway webhook. Mounted outside the
/// authenticated tree; the signature is the authentication.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(receive_webhook))
}

/// Every rejection is the same generic 400. The gateway retries on its own
/// schedule and an attacker probing the endpoint learns nothing about which
/// check failed.
fn rejection() -> ServiceError {
    ServiceError::BadRequest("invalid webhook".to_string())
}

/// Receive a payment lifecycle event from the gateway.
///
/// The body must stay raw until the signature verifies; parsing first would
/// both break verification and hand unauthenticated input to the JSON
/// parser. Payment events are logged and audited only: fulfillment stays
/// client-triggered and re-verifies the intent with the gateway itself.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Delivery acknowledged"),
        (status = 400, description = "Signature, payload, or configuration problem", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    counter!("reczone_webhooks.received", 1);

    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        // Fail closed: without a secret nothing can be authenticated.
        warn!("Payment webhook received but no signing secret is configured");
        counter!("reczone_webhooks.rejected", 1);
        return Err(rejection());
    };

    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.webhook_tolerance_secs(),
    ) {
        warn!("Payment webhook signature verification failed");
        counter!("reczone_webhooks.rejected", 1);
        return Err(rejection());
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|_| {
        counter!("reczone_webhooks.rejected", 1);
        rejection()
    })?;

    // Gateways redeliver on slow acks; the first delivery wins and the rest
    // are acknowledged without re-processing.
    if let Some(event_id) = envelope.id.as_deref() {
        if !first_delivery(&state.redis, event_id).await {
            info!(%event_id, "Webhook event already processed");
            counter!("reczone_webhooks.duplicate", 1);
            return Ok((StatusCode::OK, Json(json!({ "received": true }))));
        }
    }

    match envelope.event_type.as_str() {
        "payment_succeeded" => {
            let payment_intent_id = envelope.intent_id().ok_or_else(rejection)?;
            info!(%payment_intent_id, "Gateway reports payment succeeded");
            state
                .event_sender
                .send_or_log(Event::PaymentSucceeded { payment_intent_id })
                .await;
        }
        "payment_failed" => {
            let payment_intent_id = envelope.intent_id().ok_or_else(rejection)?;
            warn!(%payment_intent_id, "Gateway reports payment failed");
            state
                .event_sender
                .send_or_log(Event::PaymentFailed { payment_intent_id })
                .await;
        }
        other => {
            info!(event_type = other, "Ignoring unhandled payment webhook type");
        }
    }

    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

/// `SET NX EX` on the event id; false means a previous delivery claimed it.
/// Redis being down degrades to processing every delivery rather than
/// dropping webhooks.
async fn first_delivery(redis: &redis::Client, event_id: &str) -> bool {
    let key = format!("wh:{}", event_id);
    match redis.get_async_connection().await {
        Ok(mut conn) => {
            let claimed: Result<bool, redis::RedisError> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(24 * 3600)
                .query_async(&mut conn)
                .await;
            match claimed {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Webhook dedup write failed: {}", e);
                    true
                }
            }
        }
        Err(e) => {
            warn!("Redis unavailable for webhook dedup: {}", e);
            true
        }
    }
}

/// Checks the request signature against the raw payload.
///
/// Two header forms are accepted: `x-timestamp` + `x-signature`, and a
/// Stripe-style `Stripe-Signature: t=...,v1=...`. Both sign
/// `"{timestamp}.{body}"` with HMAC-SHA256 and both enforce the timestamp
/// tolerance, so a captured delivery cannot be replayed later.
fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance_secs: u64) -> bool {
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            return timestamp_fresh(ts, tolerance_secs)
                && signature_matches(secret, ts, payload, sig);
        }
        return false;
    }

    if let Some(header) = headers.get("stripe-signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = val,
                Some(("v1", val)) => v1 = val,
                _ => {}
            }
        }
        if ts.is_empty() || v1.is_empty() {
            return false;
        }
        return timestamp_fresh(ts, tolerance_secs) && signature_matches(secret, ts, payload, v1);
    }

    false
}

fn timestamp_fresh(ts: &str, tolerance_secs: u64) -> bool {
    let Ok(ts) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    (now - ts).unsigned_abs() <= tolerance_secs
}

fn signature_matches(secret: &str, ts: &str, payload: &[u8], provided_hex: &str) -> bool {
    let Ok(body) = std::str::from_utf8(payload) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{}.{}", ts, body).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided_hex)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Event envelope as the gateway serializes it. `data` is optional so
/// unknown event shapes can still be acknowledged after verification.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

impl WebhookEnvelope {
    fn intent_id(&self) -> Option<String> {
        self.data.as_ref().map(|d| d.object.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test_secret";

    fn sign(secret: &str, ts: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, body).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn generic_headers(ts: i64, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(sig).unwrap());
        headers
    }

    fn stripe_headers(ts: i64, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t={},v1={}", ts, sig)).unwrap(),
        );
        headers
    }

    // ==================== Signature Verification Tests ====================

    #[test]
    fn generic_header_form_verifies() {
        let body = r#"{"id":"evt_1","type":"payment_succeeded"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = generic_headers(ts, &sign(SECRET, ts, body));

        assert!(verify_signature(&headers, body.as_bytes(), SECRET, 300));
    }

    #[test]
    fn stripe_header_form_verifies() {
        let body = r#"{"id":"evt_2","type":"payment_failed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = stripe_headers(ts, &sign(SECRET, ts, body));

        assert!(verify_signature(&headers, body.as_bytes(), SECRET, 300));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = r#"{"id":"evt_3","type":"payment_succeeded"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = generic_headers(ts, &sign(SECRET, ts, body));

        let tampered = r#"{"id":"evt_3","type":"payment_failed"}"#;
        assert!(!verify_signature(&headers, tampered.as_bytes(), SECRET, 300));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = r#"{"id":"evt_4","type":"payment_succeeded"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = generic_headers(ts, &sign("whsec_other", ts, body));

        assert!(!verify_signature(&headers, body.as_bytes(), SECRET, 300));
    }

    #[test]
    fn stale_timestamp_is_rejected_in_both_forms() {
        let body = r#"{"id":"evt_5","type":"payment_succeeded"}"#;
        let stale = chrono::Utc::now().timestamp() - 10_000;

        let headers = generic_headers(stale, &sign(SECRET, stale, body));
        assert!(!verify_signature(&headers, body.as_bytes(), SECRET, 300));

        let headers = stripe_headers(stale, &sign(SECRET, stale, body));
        assert!(!verify_signature(&headers, body.as_bytes(), SECRET, 300));
    }

    #[test]
    fn non_numeric_timestamp_is_rejected() {
        let body = r#"{}"#;
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_static("yesterday"));
        headers.insert(
            "x-signature",
            HeaderValue::from_str(&sign(SECRET, 0, body)).unwrap(),
        );

        assert!(!verify_signature(&headers, body.as_bytes(), SECRET, 300));
    }

    #[test]
    fn missing_headers_are_rejected() {
        let headers = HeaderMap::new();
        assert!(!verify_signature(&headers, b"{}", SECRET, 300));
    }

    #[test]
    fn stripe_header_missing_v1_is_rejected() {
        let ts = chrono::Utc::now().timestamp();
        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t={}", ts)).unwrap(),
        );

        assert!(!verify_signature(&headers, b"{}", SECRET, 300));
    }

    #[test]
    fn constant_time_eq_requires_exact_match() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc123", "abc12"));
        assert!(!constant_time_eq("", "a"));
    }

    // ==================== Envelope Tests ====================

    #[test]
    fn envelope_decodes_intent_id() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{"id":"evt_9","type":"payment_succeeded","data":{"object":{"id":"pi_42"}}}"#,
        )
        .unwrap();

        assert_eq!(envelope.id.as_deref(), Some("evt_9"));
        assert_eq!(envelope.event_type, "payment_succeeded");
        assert_eq!(envelope.intent_id().as_deref(), Some("pi_42"));
    }

    #[test]
    fn envelope_tolerates_unknown_shapes() {
        let envelope: WebhookEnvelope =
            serde_json::from_str(r#"{"type":"gateway.ping"}"#).unwrap();

        assert_eq!(envelope.event_type, "gateway.ping");
        assert!(envelope.id.is_none());
        assert!(envelope.intent_id().is_none());
    }
}
