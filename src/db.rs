use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{error, info};

pub type DbPool = DatabaseConnection;

/// Opens the connection pool with the tuning carried in [`AppConfig`].
///
/// SQLite URLs work unchanged for development and tests; production points
/// `database_url` at Postgres.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(true);

    gauge!("reczone_db.max_connections", cfg.db_max_connections as f64);
    info!(
        max_connections = cfg.db_max_connections,
        "Connecting to database"
    );

    let pool = Database::connect(options).await.map_err(|e| {
        counter!("reczone_db.connection_failures", 1);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established");
    Ok(pool)
}

/// Applies any pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    match migrations::Migrator::up(pool, None).await {
        Ok(()) => {
            info!("Migrations completed in {:?}", start.elapsed());
            Ok(())
        }
        Err(e) => {
            error!("Migrations failed after {:?}: {}", start.elapsed(), e);
            Err(ServiceError::DatabaseError(e))
        }
    }
}
