//! Admin Endpoints
//!
//! Mounted only when an admin token is configured; see `create_router`.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use umlgate_core::{PurgeReport, TieredCache, TieredCacheInfo};

use crate::error::ApiResult;
use crate::services::{AvailabilityCoordinator, SupervisorStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfoResponse {
    pub cache: TieredCacheInfo,
    pub upstream: SupervisorStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceResetResponse {
    /// Whether a recorded start failure was discarded.
    pub cleared: bool,
    pub upstream: SupervisorStatus,
}

/// GET /admin/cache/info
pub async fn cache_info(State(state): State<AppState>) -> Json<CacheInfoResponse> {
    Json(CacheInfoResponse {
        cache: state.cache.info().await,
        upstream: state.availability.status(),
    })
}

/// POST /admin/cache/purge
pub async fn purge_cache(State(cache): State<Arc<TieredCache>>) -> ApiResult<Json<PurgeReport>> {
    let report = cache.purge().await?;
    tracing::info!(
        memory_entries = report.memory_entries,
        disk_files = report.disk_files,
        "Cache purged"
    );
    Ok(Json(report))
}

/// POST /admin/service/reset
///
/// Forgets a failed start so the next request tries again.
pub async fn reset_service(
    State(availability): State<Arc<AvailabilityCoordinator>>,
) -> Json<ServiceResetResponse> {
    let cleared = availability.clear_failure();
    if cleared {
        tracing::info!("Cleared recorded analysis service failure");
    }
    Json(ServiceResetResponse {
        cleared,
        upstream: availability.status(),
    })
}
