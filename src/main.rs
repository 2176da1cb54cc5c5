use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, Any, CorsLayer},
};
use tracing::{error, info, warn};

use reczone_api::{
    api_v1_routes,
    auth::AuthService,
    config::{self, AppConfig},
    db, events,
    handlers::AppServices,
    health_check,
    middleware_helpers::request_id::request_id_middleware,
    openapi,
    services::{HttpPaymentGateway, PaymentGateway},
    tracing::configure_http_tracing,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("database connection failed")?;
    if cfg.auto_migrate {
        db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Redis connections are opened lazily; the health endpoint reports on them.
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = events::EventSender::new(event_tx);
    tokio::spawn(events::process_events(event_rx));

    let auth_service = Arc::new(AuthService::from_config(&cfg));

    // Without a gateway key carts and waived checkouts still work; intent
    // creation fails upstream. Config validation already refuses this state
    // outside development.
    if cfg.payment_gateway_api_key.is_none() {
        warn!("Payment gateway API key not configured; paid checkouts will be rejected upstream");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
        cfg.payment_gateway_base_url.clone(),
        cfg.payment_gateway_api_key.clone().unwrap_or_default(),
        Duration::from_secs(30),
    )?);

    let services = AppServices::new(db.clone(), Arc::new(event_sender.clone()), gateway, &cfg);

    let app_state = AppState {
        db: db.clone(),
        config: cfg.clone(),
        event_sender,
        services,
        redis: redis_client,
    };

    let cors_layer = cors_layer_from_config(&cfg)?;

    let app = Router::<AppState>::new()
        .route("/", get(|| async { "reczone-api up" }))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(cfg.max_body_size))
        .layer(cors_layer)
        // The bearer-token middleware reads the AuthService out of extensions.
        .layer(middleware::from_fn_with_state(
            auth_service,
            attach_auth_service,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 reczone-api listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn attach_auth_service(
    State(auth): State<Arc<AuthService>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    req.extensions_mut().insert(auth);
    next.run(req).await
}

/// Explicit origins when configured; permissive only where config allows it.
///
/// Credentialed CORS cannot use wildcard methods or headers, so that
/// combination mirrors the request instead.
fn cors_layer_from_config(cfg: &AppConfig) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            (!trimmed.is_empty())
                .then(|| HeaderValue::from_str(trimmed).ok())
                .flatten()
        })
        .collect();

    if !origins.is_empty() {
        let layer = CorsLayer::new().allow_origin(origins);
        let layer = if cfg.cors_allow_credentials {
            layer
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        } else {
            layer.allow_methods(Any).allow_headers(Any)
        };
        return Ok(layer);
    }

    if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        return Ok(CorsLayer::permissive());
    }

    error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
    Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}
