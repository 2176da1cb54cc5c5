//! RecZone API Library
//!
//! This crate provides the core functionality for the RecZone checkout API
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthRouterExt;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub redis: Arc<redis::Client>,
}

/// Envelope for the operational endpoints (`/health`, `/api/v1/status`).
/// Resource endpoints return their payloads bare.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// Correlation data stamped on every envelope.
#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ResponseMeta {
    fn current() -> Self {
        let request_id =
            crate::tracing::current_request_id().map(|rid| rid.as_str().to_string());
        Self {
            request_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::assemble(true, Some(data), None)
    }

    pub fn error(message: String) -> Self {
        Self::assemble(false, None, Some(message))
    }

    fn assemble(success: bool, data: Option<T>, message: Option<String>) -> Self {
        Self {
            success,
            data,
            message,
            meta: Some(ResponseMeta::current()),
        }
    }
}

/// Versioned API routes: carts, checkout, orders, and the payment webhook.
///
/// Family-facing routes sit behind the bearer-token middleware. The webhook
/// route is deliberately outside it; the gateway authenticates with an HMAC
/// signature over the raw body instead of a JWT.
pub fn api_v1_routes() -> Router<AppState> {
    let carts = handlers::carts::carts_routes().with_auth();
    let checkout = handlers::checkout::checkout_routes().with_auth();
    let orders = handlers::orders::orders_routes().with_auth();
    let payments = handlers::payment_webhooks::webhook_routes();

    Router::new()
        .route("/status", get(api_status))
        .nest("/carts", carts)
        .nest("/checkout", checkout)
        .nest("/orders", orders)
        .nest("/payments", payments)
}

async fn api_status() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "reczone-api",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// Liveness probe covering the database pool and the Redis client.
///
/// Always answers 200; degraded dependencies show up in the body so load
/// balancers keep routing while operators see what is down.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let database_healthy = state.db.ping().await.is_ok();
    let redis_healthy = redis_reachable(&state.redis).await;

    let label = |ok: bool| if ok { "healthy" } else { "unhealthy" };
    Json(ApiResponse::success(json!({
        "status": label(database_healthy && redis_healthy),
        "checks": {
            "database": label(database_healthy),
            "cache": label(redis_healthy),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn redis_reachable(client: &redis::Client) -> bool {
    match client.get_async_connection().await {
        Ok(mut conn) => redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_envelope_carries_the_request_id() {
        let envelope = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("req-abc123"),
            async { ApiResponse::success("ok") },
        )
        .await;

        assert!(envelope.success);
        let meta = envelope.meta.expect("envelope meta");
        assert_eq!(meta.request_id.as_deref(), Some("req-abc123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("rfc3339 timestamp");
    }

    #[tokio::test]
    async fn error_envelope_carries_the_message_and_request_id() {
        let envelope = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("req-err456"),
            async { ApiResponse::<()>::error("oops".into()) },
        )
        .await;

        assert!(!envelope.success);
        assert_eq!(envelope.message.as_deref(), Some("oops"));
        let meta = envelope.meta.expect("envelope meta");
        assert_eq!(meta.request_id.as_deref(), Some("req-err456"));
    }
}
