//! Finsync Service - account linking over the Setu Account Aggregator.
//!
//! This is the main entry point for the finsync service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finsync_service::{create_router, AppState, ServiceConfig};
use finsync_store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,finsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Finsync Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        setu_base_url = %config.setu_base_url,
        webhook_signed = %config.setu_webhook_secret.is_some(),
        session_on_consent_active = %config.session_on_consent_active,
        "Service configuration loaded"
    );

    tracing::info!(
        max_connections = config.database_max_connections,
        "Connecting to PostgreSQL"
    );
    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;

    let state = AppState::from_config(Arc::new(store), config.clone())?;

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
