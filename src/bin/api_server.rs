// API Server Binary Entry Point
//
// Purpose: Start the Axum API server over the seeded tree registry
// Usage: cargo run --features api --bin api_server

use habitas_services::{create_router, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    // Default log level: info for our crate, warn for others
                    "habitas_services=info,tower_http=debug,axum=debug,warn".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API server...");

    let config = ServerConfig::from_env();

    tracing::info!("Configuration:");
    tracing::info!("  REGISTRY_FILE: {:?}", config.registry_file);
    tracing::info!("  PORT: {}", config.port);
    tracing::info!("  CACHE: {} entries, TTL {:?}", config.cache_capacity, config.cache_ttl);
    tracing::info!("  SAMPLE: dap={} altura={}", config.sample.dap, config.sample.altura);

    // Initialize application state (loads and validates the registry)
    let state = AppState::load(&config)?;
    tracing::info!("Application state initialized successfully");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await?;

    Ok(())
}
