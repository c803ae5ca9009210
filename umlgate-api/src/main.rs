//! umlgate API Server Entry Point
//!
//! Loads configuration from the environment, wires the shared state and
//! serves until SIGINT/SIGTERM, then stops any analysis service it started.

use std::net::SocketAddr;

use umlgate_api::telemetry::{init_tracing, TelemetryConfig};
use umlgate_api::{create_router, shutdown_signal, ApiConfig, ApiError, ApiResult, AppState};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ApiConfig::from_env();
    let addr = config.bind_addr()?;
    tracing::info!(
        upstream = %config.upstream_url,
        autostart = config.autostart,
        admin = config.admin_enabled(),
        rate_limit = config.rate_limit_enabled,
        "Loaded configuration"
    );

    let state = AppState::from_config(config).await?;
    state.availability.register_shutdown_hook();
    let availability = state.availability.clone();

    let app = create_router(state);

    tracing::info!(%addr, "Starting umlgate API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    tracing::info!("Shutdown signal received, stopping analysis service");
    availability.stop();
    Ok(())
}
