#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

use reczone_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{catalog_item, family, family_member, ItemType, MembershipStatus},
    events::{self, EventSender},
    handlers::AppServices,
    services::{HttpPaymentGateway, PaymentGateway},
    AppState,
};

/// Helper harness for spinning up an application state backed by a
/// throwaway SQLite database and a mock payment gateway.
pub struct TestApp {
    pub state: AppState,
    router: Router,
    /// Family seeded for the default authenticated caller
    pub family_id: Uuid,
    /// Auth uid of the seeded parent
    pub user_id: String,
    token: String,
    auth_service: Arc<AuthService>,
    /// Mock gateway server; mount intent expectations per test
    pub gateway: MockServer,
    _db_dir: TempDir,
    event_task: tokio::task::JoinHandle<()>,
}

/// A second family with its own authenticated parent, for ownership tests
pub struct FamilyContext {
    pub family_id: Uuid,
    pub user_id: String,
    pub token: String,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::build(Some("whsec_integration_test".to_string()), None).await
    }

    /// Same harness, but with no webhook signing secret configured.
    pub async fn without_webhook_secret() -> Self {
        Self::build(None, None).await
    }

    /// Harness with a short fulfillment deadline, for timeout behavior.
    pub async fn with_fulfillment_timeout(secs: u64) -> Self {
        Self::build(Some("whsec_integration_test".to_string()), Some(secs)).await
    }

    async fn build(webhook_secret: Option<String>, fulfillment_timeout_secs: Option<u64>) -> Self {
        let db_dir = TempDir::new().expect("create temp dir for test database");
        let db_path = db_dir.path().join("reczone_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "redis://127.0.0.1:6379".to_string(),
            "reczone-integration-test-signing-secret-0123456789abcdef0123456789abcdef"
                .to_string(),
            3600,
            604_800,
            "127.0.0.1".to_string(),
            18_090,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = webhook_secret;
        if let Some(secs) = fulfillment_timeout_secs {
            cfg.fulfillment_timeout_secs = secs;
        }

        let gateway_server = MockServer::start().await;
        cfg.payment_gateway_base_url = gateway_server.uri();
        cfg.payment_gateway_api_key = Some("sk_test_123".to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let redis_client = Arc::new(
            redis::Client::open(cfg.redis_url.clone()).expect("invalid redis url for tests"),
        );

        let auth_service = Arc::new(AuthService::from_config(&cfg));

        let gateway: Arc<dyn PaymentGateway> = Arc::new(
            HttpPaymentGateway::new(
                cfg.payment_gateway_base_url.clone(),
                "sk_test_123".to_string(),
                Duration::from_secs(5),
            )
            .expect("gateway client for tests"),
        );

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway,
            &cfg,
        );

        let state = AppState {
            db: db_arc.clone(),
            config: cfg.clone(),
            event_sender,
            services,
            redis: redis_client,
        };

        let family_id = Uuid::new_v4();
        let user_id = format!("user-{}", Uuid::new_v4());
        insert_family(db_arc.as_ref(), family_id, "Rivera Family").await;
        insert_member(
            db_arc.as_ref(),
            family_id,
            Some(user_id.clone()),
            "Alex",
            "Rivera",
        )
        .await;

        let token = auth_service
            .generate_token(&user_id, vec!["parent".to_string()])
            .expect("mint test token");

        let api_router = reczone_api::api_v1_routes()
            .layer(middleware::from_fn_with_state(auth_service.clone(), attach_auth));

        let router = Router::new()
            .route("/health", get(reczone_api::health_check))
            .nest("/api/v1", api_router)
            .with_state(state.clone());

        Self {
            state,
            router,
            family_id,
            user_id,
            token,
            auth_service,
            gateway: gateway_server,
            _db_dir: db_dir,
            event_task,
        }
    }

    /// Access the bearer token for the default seeded parent.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Signing secret configured for the webhook endpoint.
    pub fn webhook_secret(&self) -> &str {
        self.state
            .config
            .payment_webhook_secret
            .as_deref()
            .expect("webhook secret configured for tests")
    }

    /// Issue a JSON request, optionally authenticated with `bearer`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json).expect("serialize request body"),
                )),
            None => builder.body(Body::empty()),
        }
        .expect("build test request");

        self.dispatch(request).await
    }

    /// JSON request authenticated as the seeded parent.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token();
        self.request(method, uri, body, Some(token)).await
    }

    /// Unauthenticated POST with caller-controlled headers and a raw body,
    /// for exercising the signed webhook endpoint.
    pub async fn post_raw(
        &self,
        uri: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Response {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(Body::from(body.to_string()))
            .expect("build test request");
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Seed an active class with no enrollments.
    pub async fn seed_activity(
        &self,
        title: &str,
        price: Decimal,
        capacity: i32,
    ) -> catalog_item::Model {
        self.seed_activity_with(title, ItemType::Class, price, capacity, 0, true)
            .await
    }

    pub async fn seed_activity_with(
        &self,
        title: &str,
        item_type: ItemType,
        price: Decimal,
        capacity: i32,
        enrolled: i32,
        active: bool,
    ) -> catalog_item::Model {
        catalog_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_type: Set(item_type),
            title: Set(title.to_string()),
            description: Set(None),
            price: Set(price),
            capacity: Set(capacity),
            enrolled: Set(enrolled),
            active: Set(active),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed catalog item")
    }

    /// Seed a child in the default family (no auth uid).
    pub async fn seed_child(&self, first: &str, last: &str) -> family_member::Model {
        insert_member(self.state.db.as_ref(), self.family_id, None, first, last).await
    }

    /// Seed a second family with its own authenticated parent.
    pub async fn seed_second_family(&self, name: &str) -> FamilyContext {
        let family_id = Uuid::new_v4();
        let user_id = format!("user-{}", Uuid::new_v4());
        insert_family(self.state.db.as_ref(), family_id, name).await;
        insert_member(
            self.state.db.as_ref(),
            family_id,
            Some(user_id.clone()),
            "Sam",
            "Okafor",
        )
        .await;

        let token = self
            .auth_service
            .generate_token(&user_id, vec!["parent".to_string()])
            .expect("mint test token");

        FamilyContext {
            family_id,
            user_id,
            token,
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

async fn attach_auth(
    axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
    mut req: Request<Body>,
    next: axum::middleware::Next,
) -> Response {
    req.extensions_mut().insert(auth);
    next.run(req).await
}

async fn insert_family(db: &DatabaseConnection, id: Uuid, name: &str) -> family::Model {
    family::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        membership_status: Set(MembershipStatus::None),
        membership_expiry: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed family")
}

async fn insert_member(
    db: &DatabaseConnection,
    family_id: Uuid,
    user_id: Option<String>,
    first: &str,
    last: &str,
) -> family_member::Model {
    family_member::ActiveModel {
        id: Set(Uuid::new_v4()),
        family_id: Set(family_id),
        user_id: Set(user_id),
        first_name: Set(first.to_string()),
        last_name: Set(last.to_string()),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed family member")
}
