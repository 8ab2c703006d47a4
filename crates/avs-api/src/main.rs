//! # avs-api — Binary Entry Point
//!
//! Starts the Axum HTTP server for the verification service.
//! Binds to configurable port (default 8080).

use avs_api::state::AppConfig;
use avs_gateway::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AppConfig::from_env();
    let port = config.port;
    if config.auth_token.is_none() && config.admin_token.is_none() {
        tracing::warn!("AUTH_TOKEN and ADMIN_TOKEN not set, authentication disabled");
    }

    let gateway_config = GatewayConfig::from_env().map_err(|e| {
        tracing::error!("Gateway configuration invalid: {e}");
        e
    })?;

    // None without DATABASE_URL; sessions then live in memory.
    let db_pool = avs_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = avs_api::bootstrap::bootstrap(config, &gateway_config, db_pool).map_err(|e| {
        tracing::error!("Bootstrap failed: {e}");
        e
    })?;

    let app = avs_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Verification API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Structured tracing; JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
