//! # Pricehound API Main Entry Point
//!
//! Boots the competitor-price report service: configuration, telemetry,
//! database pool and migrations, then the HTTP server.

use pricehound::migration::Migrator;
use pricehound::{config::ConfigLoader, db::init_pool, server::run_server, telemetry};
use sea_orm_migration::MigratorTrait;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;

    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::info!("Configuration: {}", redacted_json);
    }

    // Connect and bring the schema up to date before serving traffic
    let db = init_pool(&config).await?;
    Migrator::up(&db, None).await?;

    run_server(config, db).await
}
