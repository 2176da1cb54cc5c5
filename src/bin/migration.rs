//! Applies pending migrations and exits.
//!
//! The server can do the same at boot when `APP__AUTO_MIGRATE` is set; this
//! binary covers deploy pipelines that migrate before rolling the app.

use migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), sea_orm::DbErr> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = resolve_database_url();
    info!("Applying migrations to {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(2)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(true);

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;

    info!("Migrations are up to date");
    Ok(())
}

fn resolve_database_url() -> String {
    std::env::var("APP__DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| "sqlite://reczone.db?mode=rwc".to_string())
}
