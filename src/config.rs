use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_reczone";

/// Application configuration, layered from files and `APP__*` variables.
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub database_url: String,

    /// Redis, used for webhook deduplication
    pub redis_url: String,

    /// HS256 signing key; 64 characters minimum
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime (seconds)
    pub jwt_expiration: usize,

    /// Refresh token lifetime (seconds)
    pub refresh_token_expiration: usize,

    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    /// "development", "staging", or "production"
    pub environment: String,

    #[serde(default = "defaults::log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations at startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated allowed origins; required outside development
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Opt-in to permissive CORS outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    #[serde(default = "defaults::db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "defaults::db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "defaults::db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "defaults::db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "defaults::db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Buffer size of the domain event channel
    #[serde(default = "defaults::event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "defaults::payment_gateway_base_url")]
    pub payment_gateway_base_url: String,

    /// Gateway secret key, provisioned out-of-band
    #[serde(default)]
    pub payment_gateway_api_key: Option<String>,

    /// Webhook signing secret; without it the webhook endpoint rejects
    /// everything
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp freshness window (seconds)
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    /// Upper bound on a single fulfillment attempt (seconds)
    #[serde(default = "defaults::fulfillment_timeout_secs")]
    pub fulfillment_timeout_secs: u64,

    /// ISO currency code charges are denominated in
    #[serde(default = "defaults::currency")]
    pub default_currency: String,

    /// Request body cap (bytes)
    #[serde(default = "defaults::max_body_size")]
    pub max_body_size: usize,

    #[serde(default = "defaults::api_page_size")]
    pub api_default_page_size: u32,

    #[serde(default = "defaults::api_max_page_size")]
    pub api_max_page_size: u32,

    #[serde(default = "defaults::auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "defaults::auth_audience")]
    pub auth_audience: String,
}

impl AppConfig {
    /// Builds a config from the connection essentials, filling every other
    /// field with its default. Mostly a test and tooling convenience.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: String,
        redis_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        refresh_token_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            jwt_expiration,
            refresh_token_expiration,
            host,
            port,
            environment,
            log_level: defaults::log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: defaults::db_max_connections(),
            db_min_connections: defaults::db_min_connections(),
            db_connect_timeout_secs: defaults::db_connect_timeout_secs(),
            db_idle_timeout_secs: defaults::db_idle_timeout_secs(),
            db_acquire_timeout_secs: defaults::db_acquire_timeout_secs(),
            event_channel_capacity: defaults::event_channel_capacity(),
            payment_gateway_base_url: defaults::payment_gateway_base_url(),
            payment_gateway_api_key: None,
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: None,
            fulfillment_timeout_secs: defaults::fulfillment_timeout_secs(),
            default_currency: defaults::currency(),
            max_body_size: defaults::max_body_size(),
            api_default_page_size: defaults::api_page_size(),
            api_max_page_size: defaults::api_max_page_size(),
            auth_issuer: defaults::auth_issuer(),
            auth_audience: defaults::auth_audience(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Webhook timestamp tolerance, defaulting to five minutes
    pub fn webhook_tolerance_secs(&self) -> u64 {
        self.payment_webhook_tolerance_secs.unwrap_or(300)
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        match &self.cors_allowed_origins {
            Some(raw) => raw.split(',').any(|origin| !origin.trim().is_empty()),
            None => false,
        }
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Cross-field rules the derive cannot express.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            errors.add(
                "cors_allowed_origins",
                named_error(
                    "cors_allowed_origins_required",
                    "Set APP__CORS_ALLOWED_ORIGINS outside development, or opt in to permissive CORS with APP__CORS_ALLOW_ANY_ORIGIN=true",
                ),
            );
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            errors.add(
                "jwt_secret",
                named_error(
                    "jwt_secret_default_dev",
                    "The bundled development JWT secret only works in development; set APP__JWT_SECRET to a unique value",
                ),
            );
        }

        let gateway_key_missing = self
            .payment_gateway_api_key
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty();
        if !self.is_development() && gateway_key_missing {
            errors.add(
                "payment_gateway_api_key",
                named_error(
                    "payment_gateway_api_key_required",
                    "Set APP__PAYMENT_GATEWAY_API_KEY outside development; checkout cannot create payment intents without it",
                ),
            );
        }

        if errors.errors().is_empty() {
            return Ok(());
        }
        Err(errors)
    }
}

// Keeps API keys and signing secrets out of logs; everything else prints as-is.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("redis_url", &self.redis_url)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_expiration", &self.jwt_expiration)
            .field("refresh_token_expiration", &self.refresh_token_expiration)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("auto_migrate", &self.auto_migrate)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("cors_allow_any_origin", &self.cors_allow_any_origin)
            .field("cors_allow_credentials", &self.cors_allow_credentials)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_connect_timeout_secs", &self.db_connect_timeout_secs)
            .field("db_idle_timeout_secs", &self.db_idle_timeout_secs)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("payment_gateway_base_url", &self.payment_gateway_base_url)
            .field(
                "payment_gateway_api_key",
                &self.payment_gateway_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "payment_webhook_secret",
                &self.payment_webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "payment_webhook_tolerance_secs",
                &self.payment_webhook_tolerance_secs,
            )
            .field("fulfillment_timeout_secs", &self.fulfillment_timeout_secs)
            .field("default_currency", &self.default_currency)
            .field("max_body_size", &self.max_body_size)
            .field("api_default_page_size", &self.api_default_page_size)
            .field("api_max_page_size", &self.api_max_page_size)
            .field("auth_issuer", &self.auth_issuer)
            .field("auth_audience", &self.auth_audience)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("io error while loading configuration: {0}")]
    Io(#[from] std::io::Error),
}

fn named_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Fallbacks for fields a deployment rarely overrides. Referenced by the
/// serde attributes on [`AppConfig`].
mod defaults {
    pub fn log_level() -> String {
        super::DEFAULT_LOG_LEVEL.to_string()
    }

    pub fn port() -> u16 {
        super::DEFAULT_PORT
    }

    pub fn db_max_connections() -> u32 {
        16
    }

    pub fn db_min_connections() -> u32 {
        2
    }

    pub fn db_connect_timeout_secs() -> u64 {
        30
    }

    pub fn db_idle_timeout_secs() -> u64 {
        600
    }

    pub fn db_acquire_timeout_secs() -> u64 {
        8
    }

    pub fn event_channel_capacity() -> usize {
        1024
    }

    pub fn payment_gateway_base_url() -> String {
        "https://api.stripe.com".to_string()
    }

    pub fn fulfillment_timeout_secs() -> u64 {
        10
    }

    pub fn currency() -> String {
        "usd".to_string()
    }

    pub fn max_body_size() -> usize {
        2 * 1024 * 1024 // 2MB is plenty for cart payloads
    }

    pub fn api_page_size() -> u32 {
        20
    }

    pub fn api_max_page_size() -> u32 {
        100
    }

    pub fn auth_issuer() -> String {
        "reczone-api".to_string()
    }

    pub fn auth_audience() -> String {
        "reczone-app".to_string()
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(named_error(
            "log_level",
            "Must be one of: trace, debug, info, warn, error",
        )),
    }
}

/// Rejects secrets that are short, well-known, or low-entropy. The length
/// floor matches what HS256 wants for its key.
fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    const DISALLOWED: [&str; 4] = [
        "your-secret-key",
        "default-secret-key",
        "replace-me-with-a-real-secret",
        "jwt-signing-secret",
    ];
    const WEAK_FRAGMENTS: [&str; 5] = ["changeme", "password", "default", "12345", "abcdef"];

    let trimmed = secret.trim();

    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        return Err(named_error(
            "jwt_secret",
            "JWT secret must be overridden with a secure random value",
        ));
    }

    if trimmed.len() < 64 {
        return Err(named_error(
            "jwt_secret",
            "JWT secret must be at least 64 characters",
        ));
    }

    let mut chars = trimmed.chars();
    let first = chars.next();
    if first.is_some() && chars.all(|c| Some(c) == first) {
        return Err(named_error(
            "jwt_secret",
            "JWT secret cannot be a repeated character sequence",
        ));
    }

    let lower = trimmed.to_ascii_lowercase();
    if WEAK_FRAGMENTS.iter().any(|fragment| lower.contains(fragment)) {
        return Err(named_error(
            "jwt_secret",
            "JWT secret appears to be weak; use a cryptographically strong random string",
        ));
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        return Err(named_error(
            "jwt_secret",
            "JWT secret needs at least 10 distinct characters",
        ));
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        return Err(named_error(
            "event_channel_capacity",
            "event_channel_capacity must be greater than 0",
        ));
    }
    Ok(())
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("reczone_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(&filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(&filter_directive))
            .try_init();
    }
}

/// Loads and validates configuration.
///
/// Sources layer in order: `config/default.toml`, `config/{env}.toml`
/// (selected by `RUN_ENV` or `APP_ENV`), `config/docker.toml` when `DOCKER`
/// is set, then `APP__*` environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = ["RUN_ENV", "APP_ENV"]
        .iter()
        .find_map(|key| env::var(key).ok())
        .unwrap_or_else(|| DEFAULT_ENV.to_string());
    info!("Loading configuration (environment: {})", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "No '{}' directory; using built-in defaults plus APP__* variables",
            CONFIG_DIR
        );
    }

    let merged = layered_sources(&run_env)?.build()?;

    // jwt_secret deliberately has no default; it must come from a file or
    // APP__JWT_SECRET.
    if merged.get_string("jwt_secret").is_err() {
        error!("No JWT secret configured. Set APP__JWT_SECRET to a secure random string of 64+ characters.");
        error!("Generate one with: openssl rand -base64 64");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = merged.try_deserialize()?;

    let reject = |e: ValidationErrors| {
        error!("Configuration rejected: {:?}", e);
        AppConfigError::Validation(e)
    };
    app_config.validate().map_err(reject)?;
    app_config.validate_additional_constraints().map_err(reject)?;

    info!("Configuration loaded");
    Ok(app_config)
}

fn layered_sources(
    run_env: &str,
) -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let mut builder = Config::builder()
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("database_url", "sqlite://reczone.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("jwt_expiration", 3600)?
        .set_default("refresh_token_expiration", 604800)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if env::var("DOCKER").is_ok() {
        info!("Applying docker config layer");
        builder =
            builder.add_source(File::with_name(&format!("{}/docker", CONFIG_DIR)).required(false));
    }

    Ok(builder.add_source(Environment::with_prefix("APP").separator("__")))
}
