//! REST API Routes Module
//!
//! - `POST /analyze`, `GET /analyze/:owner/:repo/:commit`
//! - `POST /generate-plantuml` (flat error body)
//! - `GET /health`
//! - `/admin/*`, only when an admin token is configured

pub mod admin;
pub mod analyze;
pub mod health;
pub mod plantuml;

use std::any::Any;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, header::HeaderName, HeaderValue, Method, Uri},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use secrecy::SecretString;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};

use crate::config::ApiConfig;
use crate::constants::{ADMIN_TOKEN_HEADER, MULTIPART_OVERHEAD_BYTES};
use crate::error::{ApiError, ErrorFormat};
use crate::middleware::{
    admin_middleware, error_format_middleware, rate_limit_middleware, AdminGuard, RateLimitState,
};
use crate::state::AppState;
use crate::telemetry;

// ============================================================================
// ROUTER
// ============================================================================

/// Build the full application router.
///
/// Layer order, outermost first: CORS, tracing, panic recovery, body limit.
/// Rate limiting wraps only the analysis and diagram routes.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let rate_limit = RateLimitState::new(&config);

    let analysis = Router::new()
        .route("/analyze", post(analyze::analyze))
        .route("/analyze/:owner/:repo/:commit", get(analyze::snapshot))
        .route_layer(from_fn_with_state(rate_limit.clone(), rate_limit_middleware));

    // The format layer goes on last so it also reshapes 429s.
    let diagrams = Router::new()
        .route("/generate-plantuml", post(plantuml::generate_plantuml))
        .route_layer(from_fn_with_state(rate_limit, rate_limit_middleware))
        .route_layer(from_fn_with_state(ErrorFormat::Simple, error_format_middleware));

    let mut router = Router::new()
        .route("/health", get(health::health))
        .merge(analysis)
        .merge(diagrams);

    match config.admin_token.as_ref().filter(|_| config.admin_enabled()) {
        Some(token) => router = router.merge(admin_router(token)),
        None => tracing::info!("Admin token not configured, admin routes disabled"),
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(
            config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(telemetry::trace_layer())
        .layer(build_cors_layer(&config))
}

fn admin_router(token: &SecretString) -> Router<AppState> {
    Router::new()
        .route("/admin/cache/info", get(admin::cache_info))
        .route("/admin/cache/purge", post(admin::purge_cache))
        .route("/admin/service/reset", post(admin::reset_service))
        .route_layer(from_fn_with_state(AdminGuard::new(token), admin_middleware))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Handler panicked");
    ApiError::internal_error("Internal server error").into_response()
}

// ============================================================================
// CORS
// ============================================================================

/// Empty `cors_origins` allows any origin.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-analysis-source"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(3600));

    if config.cors_origins.is_empty() {
        return cors.allow_origin(AnyOrigin).allow_headers(AnyOrigin);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    tracing::info!(origins = ?config.cors_origins, "CORS restricted to configured origins");

    cors.allow_origin(origins).allow_headers([
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(ADMIN_TOKEN_HEADER),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_both_modes() {
        let _ = build_cors_layer(&ApiConfig::default());
        let mut config = ApiConfig::default();
        config.cors_origins = vec!["https://app.example.com".to_string(), "bad\norigin".to_string()];
        let _ = build_cors_layer(&config);
    }

    #[test]
    fn test_panic_becomes_internal_error() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
